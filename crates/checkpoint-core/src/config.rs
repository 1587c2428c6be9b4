//! Checkpoint manager configuration types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Top-level settings: what to checkpoint and where to put it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Checkpoint cadence and retention
    pub checkpoint: CheckpointManagerConfig,

    /// Storage backend selection
    pub storage: StorageConfig,
}

impl ManagerSettings {
    /// Parse settings from a JSON document and validate them
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.checkpoint.validate()?;
        Ok(settings)
    }
}

/// Checkpoint manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointManagerConfig {
    /// Base path for checkpoints, relative to the storage backend root.
    /// Each checkpoint lives in `base_path/<step>`.
    pub base_path: String,

    /// Number of steps between checkpoints
    pub save_interval: u64,

    /// Maximum number of checkpoints to keep (0 = unbounded)
    pub max_to_keep: usize,

    /// Capacity of the async checkpoint queue
    pub async_queue_size: usize,
}

impl Default for CheckpointManagerConfig {
    fn default() -> Self {
        Self {
            base_path: "checkpoints".to_string(),
            save_interval: 1000,
            max_to_keep: 0,
            async_queue_size: 1,
        }
    }
}

impl CheckpointManagerConfig {
    /// Create a config with the given base path and interval
    pub fn new(base_path: impl Into<String>, save_interval: u64) -> Self {
        Self {
            base_path: base_path.into(),
            save_interval,
            ..Default::default()
        }
    }

    /// Set the retention bound
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep;
        self
    }

    /// Set the async queue capacity
    pub fn with_async_queue_size(mut self, async_queue_size: usize) -> Self {
        self.async_queue_size = async_queue_size;
        self
    }

    /// Check construction arguments, failing fast on bad values
    pub fn validate(&self) -> Result<()> {
        if self.save_interval == 0 {
            return Err(Error::InvalidConfig {
                message: "save_interval must be positive".to_string(),
            });
        }
        if self.async_queue_size == 0 {
            return Err(Error::InvalidConfig {
                message: "async_queue_size must be positive".to_string(),
            });
        }
        if self.base_path.trim_matches('/').is_empty() {
            return Err(Error::InvalidConfig {
                message: "base_path must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageConfig {
    /// Local filesystem rooted at `root`
    Local { root: String },

    /// S3-compatible storage
    S3 {
        bucket: String,
        prefix: Option<String>,
        endpoint: Option<String>,
        region: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            root: "./data".to_string(),
        }
    }
}
