//! Checkpoint Core - Foundation for the distributed checkpoint manager
//!
//! Provides core types, error handling, configuration and logging setup
//! shared by the storage backends and the checkpoint manager.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{CheckpointManagerConfig, ManagerSettings, StorageConfig};
pub use error::{Error, Result};
pub use types::*;
