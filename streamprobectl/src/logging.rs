use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "STREAMPROBE_LOG";

/// Structured logs go to stderr so stdout stays parseable with `--format json`.
pub fn init_logging() {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if installed.is_ok() {
        tracing::debug!("logging initialized");
    }
}
