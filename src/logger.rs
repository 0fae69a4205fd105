use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber. `RUST_LOG` wins when set;
/// otherwise the passed level (bumped to `debug` when `DEBUG` is on) is used
/// for this crate and `warn` for everything else.
pub fn init_tracing(log_level: &str, debug: bool) {
    let level = if debug { "debug" } else { log_level };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,parley={level}")));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
