use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RecorderError, Result};
use crate::snapshot::SnapshotConfig;
use crate::source::ObserveOptions;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level; `RUST_LOG` takes precedence when set
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level recorder configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub observe: ObserveOptions,
    pub snapshot: SnapshotConfig,
    pub log: LogConfig,
}

impl RecorderConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RecorderError::SerializationError {
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        // Replay restores attributes from their recorded old values.
        if self.observe.attributes && !self.observe.attribute_old_value {
            return Err(RecorderError::ConfigError {
                message: "observe.attribute_old_value is required when observing attributes"
                    .to_string(),
            });
        }

        if self.snapshot.enabled && self.snapshot.debounce_ms == 0 {
            return Err(RecorderError::ConfigError {
                message: "snapshot.debounce_ms must be greater than zero".to_string(),
            });
        }

        if self.snapshot.mime_type.trim().is_empty() {
            return Err(RecorderError::ConfigError {
                message: "snapshot.mime_type cannot be empty".to_string(),
            });
        }

        if !LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(RecorderError::ConfigError {
                message: format!(
                    "invalid log level '{}', must be one of: {}",
                    self.log.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        Ok(())
    }
}
