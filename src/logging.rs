use std::io;
use std::path::Path;

use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::EnvFilter;

pub const LOG_PREFIX: &str = "clienttime";

/// Installs the global subscriber. The TUI owns the terminal, so events go to
/// a daily-rotated file under `<data_dir>/logs` only.
pub fn enable_logging(data_dir: &Path, log_level: Option<&str>) -> Result<(), io::Error> {
    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(5)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(data_dir.join("logs"))
        .map_err(io::Error::other)?;

    let filter = match log_level {
        Some(level) => EnvFilter::new(format!("{}={level}", env!("CARGO_PKG_NAME"))),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", env!("CARGO_PKG_NAME")))),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(appender)
        .with_ansi(false)
        .try_init()
        .map_err(|err| io::Error::other(err.to_string()))
}
