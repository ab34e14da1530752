//! Tracing subscriber setup for binaries and tests that embed the runtime.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "gapl_runtime=info,gapl_vm=warn";

/// Install a `fmt` subscriber. `RUST_LOG` wins over `filter` when set.
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
