//! Configuration management.
//!
//! Settings come from a TOML file, with environment variables layered on top
//! of each section. The file is looked up in order:
//!
//! 1. An explicit path (`--config`)
//! 2. `RULEWRIGHT_CONFIG_PATH`
//! 3. The platform config dir (`~/Library/Application Support/rulewright/` on macOS)
//! 4. `~/.config/rulewright/config.toml`
//!
//! ```toml
//! store_dir = ".rulewright"
//!
//! [dedup]
//! same_target_title_threshold = 0.6
//! title_threshold = 0.8
//! content_threshold = 0.6
//!
//! [apply]
//! already_present_threshold = 0.8
//!
//! [pipeline]
//! concurrency = 3
//! batch_size = 15
//! cross_session = true
//!
//! [logging]
//! format = "compact"
//! filter = "rulewright=debug"
//! ```

use crate::services::applier::ApplyConfig;
use crate::services::deduplication::DedupConfig;
use crate::services::pipeline::PipelineConfig;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default store directory name, relative to the project root.
pub const DEFAULT_STORE_DIR: &str = ".rulewright";

/// Main configuration for rulewright.
#[derive(Debug, Clone, PartialEq)]
pub struct RulewrightConfig {
    /// Project whose rule files are read and edited.
    pub project_root: PathBuf,
    /// Store directory; relative paths resolve against the project root.
    pub store_dir: PathBuf,
    /// Dedup thresholds.
    pub dedup: DedupConfig,
    /// Applier tuning.
    pub apply: ApplyConfig,
    /// Pipeline tuning.
    pub pipeline: PipelineConfig,
    /// Logging section as written in the file.
    pub logging: LoggingSettings,
    /// File the configuration was loaded from, if any.
    pub source: Option<PathBuf>,
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// `pretty`, `compact` or `json`.
    pub format: Option<String>,
    /// Filter directives (`info`, `rulewright=debug`, ...).
    pub filter: Option<String>,
    /// Append logs to this file.
    pub file: Option<String>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Store directory.
    pub store_dir: Option<String>,
    /// Dedup section.
    pub dedup: Option<DedupConfig>,
    /// Apply section.
    pub apply: Option<ApplyConfig>,
    /// Pipeline section.
    pub pipeline: Option<PipelineConfig>,
    /// Logging section.
    pub logging: Option<LoggingSettings>,
}

impl Default for RulewrightConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            dedup: DedupConfig::default(),
            apply: ApplyConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingSettings::default(),
            source: None,
        }
    }
}

fn check_ratio(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )))
    }
}

impl RulewrightConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or a value is out of range.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        let config = Self::from_config_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.source = Some(path.to_path_buf());
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Loads configuration from `RULEWRIGHT_CONFIG_PATH` or the default locations.
    ///
    /// Returns default configuration if no config file is found or readable.
    #[must_use]
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("RULEWRIGHT_CONFIG_PATH") {
            if let Ok(config) = Self::load_from_file(Path::new(&path)) {
                return config;
            }
        }

        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let platform_config = base_dirs.config_dir().join("rulewright").join("config.toml");
        if platform_config.exists() {
            if let Ok(config) = Self::load_from_file(&platform_config) {
                return config;
            }
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("rulewright")
            .join("config.toml");
        if xdg_config.exists() {
            if let Ok(config) = Self::load_from_file(&xdg_config) {
                return config;
            }
        }

        Self::default()
    }

    /// Loads from `explicit` when given, otherwise from the default locations,
    /// then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error only when an explicit path cannot be loaded.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Converts a `ConfigFile` to `RulewrightConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();
        if let Some(store_dir) = file.store_dir {
            config.store_dir = PathBuf::from(store_dir);
        }
        if let Some(dedup) = file.dedup {
            config.dedup = dedup;
        }
        if let Some(apply) = file.apply {
            config.apply = apply;
        }
        if let Some(pipeline) = file.pipeline {
            config.pipeline = pipeline;
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }
        config
    }

    fn validate(&self) -> Result<()> {
        check_ratio(
            "dedup.same_target_title_threshold",
            self.dedup.same_target_title_threshold,
        )?;
        check_ratio("dedup.title_threshold", self.dedup.title_threshold)?;
        check_ratio("dedup.content_threshold", self.dedup.content_threshold)?;
        check_ratio(
            "apply.already_present_threshold",
            self.apply.already_present_threshold,
        )?;
        if self.pipeline.concurrency == 0 || self.pipeline.batch_size == 0 {
            return Err(Error::InvalidInput(
                "pipeline.concurrency and pipeline.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies environment variable overrides to every section.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.dedup = self.dedup.with_env_overrides();
        self.apply = self.apply.with_env_overrides();
        self.pipeline = self.pipeline.with_env_overrides();
        self
    }

    /// Sets the project root.
    #[must_use]
    pub fn with_project_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_root = path.into();
        self
    }

    /// Sets the store directory.
    #[must_use]
    pub fn with_store_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_dir = path.into();
        self
    }

    /// Store directory resolved against the project root.
    #[must_use]
    pub fn resolved_store_dir(&self) -> PathBuf {
        if self.store_dir.is_absolute() {
            self.store_dir.clone()
        } else {
            self.project_root.join(&self.store_dir)
        }
    }
}
