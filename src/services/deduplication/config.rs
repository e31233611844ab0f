//! Deduplication configuration.
//!
//! This module defines the Jaccard thresholds used to decide whether two
//! suggestions propose the same edit.

use serde::Deserialize;

/// Configuration for the dedup engine.
///
/// All thresholds are strict: overlap must be greater than the threshold.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `RULEWRIGHT_DEDUP_SAME_TARGET_TITLE_THRESHOLD` | f32 | `0.6` | Title overlap for same file and section |
/// | `RULEWRIGHT_DEDUP_TITLE_THRESHOLD` | f32 | `0.8` | Title overlap regardless of target |
/// | `RULEWRIGHT_DEDUP_CONTENT_THRESHOLD` | f32 | `0.6` | Added-content overlap regardless of target |
///
/// # Example
///
/// ```rust
/// use rulewright::services::deduplication::DedupConfig;
///
/// let config = DedupConfig::default();
/// assert_eq!(config.same_target_title_threshold, 0.6);
/// assert_eq!(config.title_threshold, 0.8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Title overlap above which suggestions on the same file and section match.
    pub same_target_title_threshold: f32,

    /// Title overlap above which any two suggestions match.
    pub title_threshold: f32,

    /// Added-content overlap above which any two suggestions match.
    pub content_threshold: f32,
}

impl DedupConfig {
    /// Creates a configuration from environment variables.
    ///
    /// Falls back to defaults for any unset variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides on top of existing values.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_f32("RULEWRIGHT_DEDUP_SAME_TARGET_TITLE_THRESHOLD") {
            self.same_target_title_threshold = v;
        }
        if let Some(v) = env_f32("RULEWRIGHT_DEDUP_TITLE_THRESHOLD") {
            self.title_threshold = v;
        }
        if let Some(v) = env_f32("RULEWRIGHT_DEDUP_CONTENT_THRESHOLD") {
            self.content_threshold = v;
        }
        self
    }

    /// Builder method to set the same-target title threshold.
    #[must_use]
    pub const fn with_same_target_title_threshold(mut self, threshold: f32) -> Self {
        self.same_target_title_threshold = threshold;
        self
    }

    /// Builder method to set the title threshold.
    #[must_use]
    pub const fn with_title_threshold(mut self, threshold: f32) -> Self {
        self.title_threshold = threshold;
        self
    }

    /// Builder method to set the content threshold.
    #[must_use]
    pub const fn with_content_threshold(mut self, threshold: f32) -> Self {
        self.content_threshold = threshold;
        self
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            same_target_title_threshold: 0.6,
            title_threshold: 0.8,
            content_threshold: 0.6,
        }
    }
}

fn env_f32(key: &str) -> Option<f32> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|v| (0.0..=1.0).contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper for float comparisons in tests.
    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < f32::EPSILON
    }

    #[test]
    fn test_default_config() {
        let config = DedupConfig::default();
        assert!(approx_eq(config.same_target_title_threshold, 0.6));
        assert!(approx_eq(config.title_threshold, 0.8));
        assert!(approx_eq(config.content_threshold, 0.6));
    }

    #[test]
    fn test_builder_methods() {
        let config = DedupConfig::default()
            .with_same_target_title_threshold(0.5)
            .with_title_threshold(0.9)
            .with_content_threshold(0.7);
        assert!(approx_eq(config.same_target_title_threshold, 0.5));
        assert!(approx_eq(config.title_threshold, 0.9));
        assert!(approx_eq(config.content_threshold, 0.7));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: DedupConfig = toml::from_str("title_threshold = 0.75").unwrap();
        assert!(approx_eq(config.title_threshold, 0.75));
        assert!(approx_eq(config.content_threshold, 0.6));
    }
}
