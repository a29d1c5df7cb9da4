//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// JSON output by default (scheduler and consumer logs are scraped);
/// `VITALERP_LOG_FORMAT=text` switches to human-readable lines for local
/// runs. Level filtering comes from `RUST_LOG`. Safe to call multiple times
/// (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let text = std::env::var("VITALERP_LOG_FORMAT").is_ok_and(|format| format == "text");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let _ = if text {
        builder.try_init()
    } else {
        builder.json().try_init()
    };
}
