//! Usage: Opt-in tracing subscriber setup for binaries and tests.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call more than once;
/// later calls are no-ops. Embedders with their own subscriber skip this.
pub fn init_tracing() {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    });
}
