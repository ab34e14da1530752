//! GAPL VM: stack interpreter for automaton bytecode.
//!
//! The interpreter runs a validated [`gapl_core::Program`] against a
//! [`VariableEnvironment`] and reaches the outside world only through the
//! [`Host`] trait.

pub mod env;
pub mod host;
pub mod stack;
pub mod tables;
pub mod vm;

pub use env::VariableEnvironment;
pub use host::{CaptureHost, Host, HostError, TableStore};
pub use stack::{Binding, Operand, OperandStack, DEFAULT_STACK_CAPACITY};
pub use tables::MemoryTableStore;
pub use vm::{lookup_builtin, Builtin, BuiltinId, Interpreter, VmError, BUILTINS, MAX_ARGS};
