//! Process-wide tracing setup for the wall controller.
//!
//! Everything is driven by three environment variables so a deployment can
//! change verbosity without touching the wall settings file:
//!
//! - `LEDWALL_LOG`: filter directives, falling back to `RUST_LOG`
//! - `LEDWALL_LOG_FORMAT`: `json` for one JSON object per line on stderr
//! - `LEDWALL_LOG_FILE`: also write plain-text logs to this file

use std::fs::File;
use std::path::PathBuf;

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

pub const LOG_ENV: &str = "LEDWALL_LOG";
pub const LOG_FORMAT_ENV: &str = "LEDWALL_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "LEDWALL_LOG_FILE";

/// Console output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub console: bool,
    pub format: LogFormat,
    /// Plain-text copy of the log, written off-thread.
    pub file: Option<PathBuf>,
    /// Filter used when neither `LEDWALL_LOG` nor `RUST_LOG` parses.
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: true,
            format: LogFormat::Compact,
            file: None,
            default_level: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(LOG_FORMAT_ENV).ok().as_deref(),
            std::env::var_os(LOG_FILE_ENV).map(PathBuf::from),
        )
    }

    fn from_vars(format: Option<&str>, file: Option<PathBuf>) -> Self {
        Self {
            format: LogFormat::parse(format),
            file: file.filter(|path| !path.as_os_str().is_empty()),
            ..Self::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
            .unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped, so `main` holds it
/// until exit. Calling this twice is an error rather than a panic.
pub fn init_logging(
    config: &LogConfig,
) -> Result<Option<LogGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(File::create(path)?);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = (config.console && config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_thread_names(true)
            .with_current_span(false)
    });

    let compact_layer = (config.console && config.format == LogFormat::Compact)
        .then(|| fmt::layer().compact().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(config.filter())
        .with(file_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        format = ?config.format,
        file = ?config.file,
        "Tracing ready"
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_log_compact_to_console_only() {
        let config = LogConfig::default();
        assert!(config.console);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.file.is_none());
        assert_eq!(config.default_level, "info");
    }

    #[test]
    fn test_format_variable_selects_json() {
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" json ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::parse(None), LogFormat::Compact);
    }

    #[test]
    fn test_file_variable_enables_file_output() {
        let config = LogConfig::from_vars(None, Some(PathBuf::from("/tmp/wall.log")));
        assert_eq!(config.file.as_deref(), Some(std::path::Path::new("/tmp/wall.log")));
        assert!(config.console);

        let empty = LogConfig::from_vars(Some("json"), Some(PathBuf::new()));
        assert!(empty.file.is_none());
        assert_eq!(empty.format, LogFormat::Json);
    }
}
