//! Tracing subscriber setup for the binaries. Library code only emits events.

use tracing_subscriber::EnvFilter;

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "SKILL_BASIN_LOG";

/// Install a stderr fmt subscriber. Honors `SKILL_BASIN_LOG`, then `RUST_LOG`,
/// and defaults to `info`. A second call is a no-op.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Like [init_logging] with an explicit filter string.
pub fn init_logging_with_filter(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}
