use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber exactly once at process startup.
///
/// `RUST_LOG` always wins when set, mirroring the teacher crate family's
/// layering of an explicit level over environment-driven defaults. Otherwise
/// falls back to `log_level` (the CLI's `--log-level`, itself defaulted to
/// `debug` when the `DEBUG` env var is truthy, `info` otherwise).
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("statuswatch={log_level}")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    tracing::debug!(log_level, "tracing subscriber initialized");
}
