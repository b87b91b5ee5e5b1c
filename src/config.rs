//! Engine configuration, loadable from TOML.

use crate::error::ConfigError;
use crate::plan::FeedbackPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Samples per processing block.
    pub block_size: usize,
    /// Output channels, one sink input each.
    pub channels: usize,
    /// How feedback loops are resolved.
    pub feedback: FeedbackPolicy,
    /// How long a threaded backend may take to halt on stop.
    pub stop_timeout_ms: u64,
    /// Maximum blocks an offline backend runs while draining on stop.
    pub drain_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            block_size: 256,
            channels: 2,
            feedback: FeedbackPolicy::SampleAccurate,
            stop_timeout_ms: 1000,
            drain_limit: 4096,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be positive".into()));
        }
        if self.channels == 0 {
            return Err(ConfigError::Invalid("channels must be positive".into()));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        Ok(())
    }

    /// Wall-clock length of one block.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }

    /// Stop timeout as a duration.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
