//! Operational log sink shared by every instance

use tracing_subscriber::EnvFilter;

/// Variable consulted before `RUST_LOG`
pub const LOG_LEVEL_ENV: &str = "AUTHZ_LOG_LEVEL";

const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the stderr subscriber. Losing the race to an already installed
/// subscriber is not an error.
pub fn init() {
    let filter = std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
