//! GAPL runtime: registered automatons reacting to published events.
//!
//! A [`Runtime`] holds the topic table, the automaton registry and the
//! persistent tables. Each registered automaton runs its programs on its
//! own thread and reports back through a [`Notification`] channel.

pub mod automaton;
pub mod compiler;
pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod registry;
pub mod runtime;
mod timer;
pub mod topic;

pub use automaton::{AutomatonId, DrainCause, Lifecycle};
pub use compiler::{CompileError, CompiledAutomaton, Compiler, JsonCompiler};
pub use config::{ConfigError, IdConfig, RuntimeConfig, TimerConfig};
pub use error::RuntimeError;
pub use logging::init_tracing;
pub use notify::{Notification, Notifier, Phase};
pub use runtime::Runtime;
