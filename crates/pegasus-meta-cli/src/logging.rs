//! Logging configuration with rolling file appender
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! Log files are stored under the data directory in `logs/`.

use std::path::PathBuf;

use pegasus_meta_core::Settings;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Get the logs directory path
pub fn logs_dir() -> PathBuf {
    Settings::data_directory().join("logs")
}

/// Initialize logging with both console and rolling file output.
///
/// The default log level is INFO, with DEBUG for pegasus-meta crates in the
/// file log. Override with the RUST_LOG environment variable; `verbose`
/// raises the console to DEBUG as well.
pub fn init_logging(verbose: bool) -> tracing_appender::non_blocking::WorkerGuard {
    let logs_dir = logs_dir();

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "pegasus-meta.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_level = if verbose { "debug" } else { "info" };
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("warn,pegasus_meta={0},pegasus_meta_core={0}", console_level))),
        );

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false) // No ANSI colors in file
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pegasus_meta=debug,pegasus_meta_core=debug")),
        );

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
