//! Log subscriber installation for vidopt binaries.
//!
//! The console shows what the user asked for. When a logs directory is given,
//! every event down to TRACE is also written to `vidopt.log` there, replacing
//! the file from the previous run, so per-sample pipeline traces are
//! available after a failed transcode.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run debug log inside the logs directory.
pub const LOG_FILE_NAME: &str = "vidopt.log";

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `console_level` for the console layer only. Returns
/// the path of the debug log when one was opened.
///
/// # Errors
/// - `std::io::Error` - Logs directory could not be created or the log file opened
/// - `tracing_subscriber::util::TryInitError` - A global subscriber is already installed
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<Option<PathBuf>, Box<dyn std::error::Error + Send + Sync>> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file_layer, log_file_path) = match logs_dir {
        Some(dir) => {
            create_dir_all(dir)?;
            let path = dir.join(LOG_FILE_NAME);
            let file = File::create(&path)?;
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(file)
                .with_filter(EnvFilter::new("trace"));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(
        console = %console_level,
        log_file = ?log_file_path,
        "Tracing initialized"
    );
    Ok(log_file_path)
}

/// Console verbosity selectable on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only failures
    Error,
    /// Failures and dropped samples
    Warn,
    /// Pass boundaries and results
    #[default]
    Info,
    /// Codec and writer lifecycle
    Debug,
    /// Every sample moved through the pipeline
    Trace,
}

impl CliLogLevel {
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_levels_map_to_tracing_levels() {
        assert_eq!(CliLogLevel::default().as_tracing_level(), Level::INFO);
        assert_eq!(CliLogLevel::Trace.as_tracing_level(), Level::TRACE);
        assert_eq!(CliLogLevel::Error.as_tracing_level(), Level::ERROR);
    }
}
