//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variables consulted for the log filter, in order.
const FILTER_ENV_VARS: &[&str] = &["RULEWRIGHT_LOG", "RUST_LOG"];

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, falling back to compact.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Resolves logging configuration.
    ///
    /// The filter comes from `RULEWRIGHT_LOG` or `RUST_LOG`, then the config
    /// file, then `info` (`debug` when `verbose`).
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let env_filter = FILTER_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok())
            .filter(|v| !v.trim().is_empty());
        let configured = settings.and_then(|s| s.filter.clone());
        let default = if verbose { "debug" } else { "info" };

        let filter = env_filter
            .or(configured)
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(default));

        Self {
            format: settings
                .and_then(|s| s.format.as_deref())
                .map(LogFormat::parse)
                .unwrap_or_default(),
            filter,
            file: settings.and_then(|s| s.file.clone()).map(PathBuf::from),
        }
    }
}
