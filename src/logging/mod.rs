use crate::models::ConnectionLog;
use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, trace, warn, LevelFilter};
use std::sync::Once;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tracing_log::LogTracer;

static INIT: Once = Once::new();

fn install(filter: EnvFilter, level: LevelFilter) {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_ansi(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: Failed to install tracing subscriber: {:?}", e);
    }

    // Bridge log events to tracing (after subscriber is set up)
    if let Err(e) = LogTracer::init() {
        eprintln!("Warning: Failed to initialize LogTracer: {:?}", e);
    }

    log::set_max_level(level);
}

/// Initialize the global logger with an explicit level such as `info` or `debug`.
///
/// Unknown levels fall back to `info`. Only the first call has any effect.
pub fn init_logger_with_level(level: &str) {
    INIT.call_once(|| {
        let level_filter = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
        let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        install(filter, level_filter);
    });
}

/// Initialize logger with environment variable support
/// Uses RUST_LOG environment variable for configuration
pub fn init_logger_with_env() {
    INIT.call_once(|| {
        let level = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string())
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::Info);

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        install(filter, level);
    });
}

/// Log a finished connection record using log (bridged to tracing via tracing-log)
pub fn log_transaction(log_entry: &ConnectionLog) -> Result<()> {
    let timestamp = Utc::now().to_rfc3339();
    let log_message = serde_json::to_string(log_entry)?;

    // Debug level so it only appears in debug mode
    debug!("[{}] CONNECTION: {}", timestamp, log_message);

    Ok(())
}

/// Log an error message
pub fn log_error(message: &str) {
    error!("{}", message);
}

/// Log an info message
pub fn log_info(message: &str) {
    info!("{}", message);
}

/// Log a warning message
pub fn log_warning(message: &str) {
    warn!("{}", message);
}

/// Log a debug message
pub fn log_debug(message: &str) {
    debug!("{}", message);
}

/// Log a trace message
pub fn log_trace(message: &str) {
    trace!("{}", message);
}

/// Convenience macro for logging connection records
#[macro_export]
macro_rules! log_connection {
    ($log_entry:expr) => {
        if let Err(e) = $crate::logging::log_transaction($log_entry) {
            eprintln!("Failed to log connection: {}", e);
        }
    };
}

/// Convenience macro for logging errors
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::logging::log_error(&format!($($arg)*));
    }};
}

/// Convenience macro for logging info messages
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::logging::log_info(&format!($($arg)*));
    }};
}

/// Convenience macro for logging warning messages
#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {{
        $crate::logging::log_warning(&format!($($arg)*));
    }};
}

/// Convenience macro for logging debug messages
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::logging::log_debug(&format!($($arg)*));
    }};
}

/// Convenience macro for logging trace messages
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::logging::log_trace(&format!($($arg)*));
    }};
}
