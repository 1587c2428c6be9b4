//! Error types for the checkpoint manager

use crate::types::Step;
use thiserror::Error;

/// Result type alias using the checkpoint Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the checkpoint manager
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Ledger errors
    #[error("Invalid ledger entry at {path}: {reason}")]
    LedgerEntryInvalid { path: String, reason: String },

    // Checkpoint errors
    #[error("Cannot restore from untracked step {step}. Valid steps are: {valid_steps:?}")]
    UntrackedStep { step: Step, valid_steps: Vec<Step> },

    #[error("Snapshot write failed at {path}: {message}")]
    SnapshotWriteFailed { path: String, message: String },

    #[error("Snapshot read failed at {path}: {message}")]
    SnapshotReadFailed { path: String, message: String },

    #[error("Checkpoint corrupted: {path} - {reason}")]
    CheckpointCorrupted { path: String, reason: String },

    #[error("Checkpoint manager is stopped")]
    ManagerStopped,

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage backend not available: {backend}")]
    StorageUnavailable { backend: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    // Coordination errors
    #[error("Collective operation failed: {operation} on rank {rank}: {message}")]
    CollectiveFailed {
        operation: String,
        rank: u32,
        message: String,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    // Channel errors
    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },
}

impl Error {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Storage { .. } | Error::StorageUnavailable { .. } | Error::CollectiveFailed { .. }
        )
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CheckpointCorrupted { .. }
                | Error::InvalidConfig { .. }
                | Error::ManagerStopped
                | Error::Internal { .. }
        )
    }

    /// Returns a retry delay hint in milliseconds, if applicable
    pub fn retry_delay_hint_ms(&self) -> Option<u64> {
        match self {
            Error::Storage { .. } => Some(100),
            Error::StorageUnavailable { .. } => Some(5000),
            Error::CollectiveFailed { .. } => Some(500),
            _ => None,
        }
    }

    /// Exponential backoff for the given zero-based retry attempt
    pub fn backoff_delay_ms(&self, attempt: u32) -> Option<u64> {
        self.retry_delay_hint_ms()
            .map(|base| base.saturating_mul(1u64 << attempt.min(16)))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
