//! Logging initialization

/// env_logger setup shared by `init` and `try_init`: default filter level
/// `info`, millisecond timestamps, overridable with RUST_LOG.
fn builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    );
    builder.format_timestamp_millis();
    builder
}

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info` and millisecond
/// timestamps. Override with RUST_LOG environment variable.
///
/// # Example
/// ```no_run
/// terrastream::core::logging::init();
/// log::info!("Terrain engine started");
/// ```
pub fn init() {
    builder().init();
}

/// Initialize logging, ignoring a logger that is already installed.
///
/// Same format as [`init`]. Useful from tests and embedding applications
/// that may set up their own.
pub fn try_init() -> bool {
    builder().try_init().is_ok()
}
