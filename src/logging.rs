use tracing_subscriber::EnvFilter;

/// Installs a formatted subscriber; `RUST_LOG` overrides `default_filter`.
/// Later calls are ignored.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
