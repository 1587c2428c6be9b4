//! Metadata ledger
//!
//! Each completed checkpoint directory carries a `.manager_metadata` file
//! recording its step and timestamp. The file is written only after the
//! snapshot data is durable, so a directory without it is an incomplete
//! checkpoint and is ignored when the tracked list is rebuilt.

use bytes::Bytes;
use checkpoint_core::{CheckpointMetadata, Error, Result, Step, MANAGER_METADATA_FILE};
use checkpoint_storage::{file_name, join_path, StorageBackend};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads and writes ledger entries through a storage backend
#[derive(Clone)]
pub struct Ledger {
    storage: Arc<dyn StorageBackend>,
}

impl Ledger {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Path of the ledger file for a checkpoint directory
    pub fn entry_path(checkpoint_path: &str) -> String {
        join_path(checkpoint_path, MANAGER_METADATA_FILE)
    }

    /// Rebuild the tracked checkpoint list from storage, oldest first
    ///
    /// Unreadable entries are skipped and reported together in one warning.
    /// Only failure to list `base_path` itself is an error; a base path that
    /// does not exist yet yields an empty list.
    pub async fn load(&self, base_path: &str) -> Result<VecDeque<CheckpointMetadata>> {
        let children = match self.storage.list(base_path).await {
            Ok(children) => children,
            Err(Error::StoragePathNotFound { .. }) => {
                debug!(base_path, "Checkpoint base path does not exist yet");
                return Ok(VecDeque::new());
            }
            Err(e) => return Err(e),
        };

        let mut checkpoints = Vec::with_capacity(children.len());
        let mut invalid_paths = Vec::new();
        for path in children {
            match self.read_entry(&path).await {
                Ok(metadata) => checkpoints.push(metadata),
                Err(e) => {
                    debug!(path = %path, error = %e, "Skipping checkpoint directory");
                    invalid_paths.push(path);
                }
            }
        }

        if !invalid_paths.is_empty() {
            warn!(?invalid_paths, "Ignoring invalid checkpoints");
        }

        checkpoints.sort_by(CheckpointMetadata::chronological);
        info!(base_path, count = checkpoints.len(), "Loaded tracked checkpoints");
        Ok(checkpoints.into())
    }

    /// Read the ledger entry of one checkpoint directory
    pub async fn read_entry(&self, checkpoint_path: &str) -> Result<CheckpointMetadata> {
        let invalid = |reason: String| Error::LedgerEntryInvalid {
            path: checkpoint_path.to_string(),
            reason,
        };

        let data = self
            .storage
            .read(&Self::entry_path(checkpoint_path))
            .await
            .map_err(|e| invalid(e.to_string()))?;
        let metadata: CheckpointMetadata =
            serde_json::from_slice(&data).map_err(|e| invalid(e.to_string()))?;

        let dir_name = file_name(checkpoint_path);
        if dir_name != metadata.step.to_string() {
            return Err(invalid(format!(
                "entry records step {} but lives in directory {}",
                metadata.step, dir_name
            )));
        }

        Ok(metadata)
    }

    /// Commit the ledger entry for a checkpoint whose data is already written
    pub async fn write(&self, checkpoint_path: &str, metadata: &CheckpointMetadata) -> Result<()> {
        let data = serde_json::to_vec(metadata)?;
        self.storage
            .write(&Self::entry_path(checkpoint_path), Bytes::from(data))
            .await?;
        debug!(path = checkpoint_path, step = metadata.step, "Ledger entry committed");
        Ok(())
    }

    /// Checkpoint directories under `base_path` that have no valid ledger
    /// entry, e.g. left behind by a crash between data and ledger writes
    ///
    /// Only children named like a step are considered; anything else under
    /// `base_path` is not a checkpoint and is never reported.
    pub async fn find_orphans(&self, base_path: &str) -> Result<Vec<String>> {
        let children = match self.storage.list(base_path).await {
            Ok(children) => children,
            Err(Error::StoragePathNotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut orphans = Vec::new();
        for path in children {
            if file_name(&path).parse::<Step>().is_err() {
                continue;
            }
            if self.read_entry(&path).await.is_err() {
                orphans.push(path);
            }
        }
        Ok(orphans)
    }
}
