//! Harness configuration.
//!
//! Values come from code (`with_*` builders), a YAML file, or environment
//! overrides. Missing YAML keys fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::result::{MirarError, MirarResult};

/// Environment variable overriding [`HarnessConfig::base_url`]
pub const ENV_BASE_URL: &str = "MIRAR_BASE_URL";

/// Environment variable overriding [`VisualConfig::update_baselines`]
pub const ENV_UPDATE_BASELINES: &str = "MIRAR_UPDATE_BASELINES";

/// Default actionability timeout (4 seconds)
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 4000;

/// Default actionability polling interval (50ms)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Visual comparison settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Directory holding baseline images
    pub baseline_dir: String,
    /// Directory receiving diff images on mismatch
    pub diff_dir: String,
    /// Fraction of compared pixels (0.0-1.0) allowed to differ
    pub threshold: f64,
    /// Per-pixel color difference tolerated (sum of RGB deltas)
    pub color_threshold: u8,
    /// Overwrite mismatching baselines with the new capture
    pub update_baselines: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            baseline_dir: String::from("__baselines__"),
            diff_dir: String::from("__diffs__"),
            threshold: 0.01,
            color_threshold: 10,
            update_baselines: false,
        }
    }
}

impl VisualConfig {
    /// Set the baseline directory
    #[must_use]
    pub fn with_baseline_dir(mut self, dir: impl Into<String>) -> Self {
        self.baseline_dir = dir.into();
        self
    }

    /// Set the diff directory
    #[must_use]
    pub fn with_diff_dir(mut self, dir: impl Into<String>) -> Self {
        self.diff_dir = dir.into();
        self
    }

    /// Set the threshold
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the color threshold
    #[must_use]
    pub const fn with_color_threshold(mut self, threshold: u8) -> Self {
        self.color_threshold = threshold;
        self
    }

    /// Enable baseline updates
    #[must_use]
    pub const fn with_update_baselines(mut self, update: bool) -> Self {
        self.update_baselines = update;
        self
    }
}

/// Top-level harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// URL of the page under test, visited when each session opens
    pub base_url: String,
    /// Viewport width
    pub viewport_width: u32,
    /// Viewport height
    pub viewport_height: u32,
    /// How long an action waits for its target to become actionable
    pub action_timeout_ms: u64,
    /// Interval between actionability checks
    pub poll_interval_ms: u64,
    /// Visual comparison settings
    pub visual: VisualConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("http://localhost:8080/commands/actions"),
            viewport_width: 1000,
            viewport_height: 660,
            action_timeout_ms: DEFAULT_ACTION_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            visual: VisualConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(yaml: &str) -> MirarResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> MirarResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Apply `MIRAR_*` environment overrides
    pub fn with_env_overrides(self) -> MirarResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> MirarResult<Self> {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(flag) = lookup(ENV_UPDATE_BASELINES) {
            self.visual.update_baselines = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(MirarError::Config {
                        message: format!("{ENV_UPDATE_BASELINES}: not a boolean: {other:?}"),
                    })
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the harness cannot run with
    pub fn validate(&self) -> MirarResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(MirarError::Config {
                message: "base_url must not be empty".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(MirarError::Config {
                message: "poll_interval_ms must be greater than zero".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.visual.threshold) {
            return Err(MirarError::Config {
                message: format!(
                    "visual.threshold must be within 0.0..=1.0, got {}",
                    self.visual.threshold
                ),
            });
        }
        Ok(())
    }

    /// Set the page under test
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    /// Set the actionability timeout
    #[must_use]
    pub const fn with_action_timeout(mut self, timeout_ms: u64) -> Self {
        self.action_timeout_ms = timeout_ms;
        self
    }

    /// Set the actionability polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Set visual comparison settings
    #[must_use]
    pub fn with_visual(mut self, visual: VisualConfig) -> Self {
        self.visual = visual;
        self
    }

    /// Actionability timeout as Duration
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Polling interval as Duration
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
