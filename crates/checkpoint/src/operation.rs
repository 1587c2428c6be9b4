//! The synchronous checkpoint operation
//!
//! [`Checkpointer`] owns the tracked checkpoint list and performs one
//! checkpoint end to end: delete stale data, collective snapshot write,
//! ledger commit, tracking, retention. Both the synchronous `save` path and
//! the background worker go through it.

use checkpoint_core::{CheckpointManagerConfig, CheckpointMetadata, Error, Result, Step};
use checkpoint_storage::{join_path, StorageBackend};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::group::CoordinationGroup;
use crate::ledger::Ledger;
use crate::retention::RetentionPolicy;
use crate::store::SnapshotStore;

/// Performs checkpoints and tracks which ones exist
pub struct Checkpointer<S: SnapshotStore> {
    config: CheckpointManagerConfig,
    storage: Arc<dyn StorageBackend>,
    store: Arc<S>,
    group: Arc<dyn CoordinationGroup>,
    ledger: Ledger,
    retention: RetentionPolicy,

    /// Completed checkpoints, oldest first
    tracked: RwLock<VecDeque<CheckpointMetadata>>,

    /// Serializes checkpoint operations within this process
    op_lock: tokio::sync::Mutex<()>,
}

impl<S: SnapshotStore> Checkpointer<S> {
    /// Create a checkpointer, rebuilding the tracked list from the ledger
    pub async fn open(
        config: CheckpointManagerConfig,
        storage: Arc<dyn StorageBackend>,
        store: Arc<S>,
        group: Arc<dyn CoordinationGroup>,
    ) -> Result<Self> {
        config.validate()?;

        let ledger = Ledger::new(storage.clone());
        let tracked = ledger.load(&config.base_path).await?;
        let retention = RetentionPolicy::new(config.max_to_keep);

        Ok(Self {
            config,
            storage,
            store,
            group,
            ledger,
            retention,
            tracked: RwLock::new(tracked),
            op_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CheckpointManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn group(&self) -> &dyn CoordinationGroup {
        self.group.as_ref()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Directory holding the checkpoint for `step`
    pub fn path_for(&self, step: Step) -> String {
        join_path(&self.config.base_path, &step.to_string())
    }

    /// True if `step` falls on the save interval
    pub fn should_save(&self, step: Step) -> bool {
        step % self.config.save_interval == 0
    }

    /// Tracked steps in ascending order
    pub fn all_steps(&self) -> Vec<Step> {
        let mut steps: Vec<Step> = self.tracked.read().iter().map(|m| m.step).collect();
        steps.sort_unstable();
        steps
    }

    /// Tracked metadata, oldest first
    pub fn all_checkpoints(&self) -> Vec<CheckpointMetadata> {
        self.tracked.read().iter().cloned().collect()
    }

    /// Metadata for a tracked step
    pub fn get_by_step(&self, step: Step) -> Option<CheckpointMetadata> {
        self.tracked.read().iter().find(|m| m.step == step).cloned()
    }

    /// Take a checkpoint if `force` is set or the step is on the interval
    ///
    /// Returns `Ok(false)` without side effects if the gate is not met.
    /// On error the ledger has not been written for this step and the step
    /// is not tracked.
    #[instrument(skip(self, snapshot), fields(rank = self.group.rank()))]
    pub async fn checkpoint(&self, step: Step, snapshot: &S::Snapshot, force: bool) -> Result<bool> {
        if !(force || self.should_save(step)) {
            return Ok(false);
        }

        let _guard = self.op_lock.lock().await;
        let start = std::time::Instant::now();
        let path = self.path_for(step);

        self.delete_stale(step, &path).await?;

        self.store.write(&path, snapshot, self.group.as_ref()).await?;

        let metadata = CheckpointMetadata::now(step);
        self.commit(&path, &metadata).await?;

        let evicted = {
            let mut tracked = self.tracked.write();
            tracked.push_back(metadata);
            self.retention.apply(&mut tracked)
        };
        self.release(evicted).await;

        info!(
            step,
            path = %path,
            elapsed_ms = start.elapsed().as_millis(),
            "Checkpoint complete"
        );
        Ok(true)
    }

    /// Collectively read the checkpoint for a tracked step into `target`
    ///
    /// Waits for any in-flight checkpoint, so retention cannot delete the
    /// step between the tracking check and the read.
    pub async fn restore(&self, step: Step, target: &mut S::Snapshot) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        if self.get_by_step(step).is_none() {
            return Err(Error::UntrackedStep {
                step,
                valid_steps: self.all_steps(),
            });
        }

        let path = self.path_for(step);
        self.store.read(&path, target, self.group.as_ref()).await?;
        info!(step, path = %path, "Checkpoint restored");
        Ok(())
    }

    /// Remove any existing checkpoint at this step before rewriting it
    async fn delete_stale(&self, step: Step, path: &str) -> Result<()> {
        let local = if self.group.is_leader() {
            self.delete_if_exists(path).await
        } else {
            Ok(())
        };

        let all_ok = self.group.all_ok("delete-stale", local.is_ok()).await?;
        local?;
        if !all_ok {
            return Err(Error::CollectiveFailed {
                operation: "delete-stale".to_string(),
                rank: self.group.rank(),
                message: format!("leader failed to clear {}", path),
            });
        }

        // The old data is gone on every rank's view of storage
        let mut tracked = self.tracked.write();
        if let Some(pos) = tracked.iter().position(|m| m.step == step) {
            tracked.remove(pos);
            debug!(step, "Dropped stale tracked checkpoint");
        }
        Ok(())
    }

    /// Leader writes the shared ledger entry; everyone waits for it
    async fn commit(&self, path: &str, metadata: &CheckpointMetadata) -> Result<()> {
        let local = if self.group.is_leader() {
            self.ledger.write(path, metadata).await
        } else {
            Ok(())
        };

        let all_ok = self.group.all_ok("ledger-commit", local.is_ok()).await?;
        local?;
        if !all_ok {
            return Err(Error::CollectiveFailed {
                operation: "ledger-commit".to_string(),
                rank: self.group.rank(),
                message: format!("leader failed to commit ledger entry for {}", path),
            });
        }
        Ok(())
    }

    /// Delete evicted checkpoints from storage (leader only)
    async fn release(&self, evicted: Vec<CheckpointMetadata>) {
        if evicted.is_empty() || !self.group.is_leader() {
            return;
        }

        for metadata in evicted {
            let path = self.path_for(metadata.step);
            match self.delete_if_exists(&path).await {
                Ok(()) => debug!(step = metadata.step, path = %path, "Deleted old checkpoint"),
                Err(e) => {
                    warn!(step = metadata.step, path = %path, error = %e, "Failed to delete old checkpoint")
                }
            }
        }
    }

    async fn delete_if_exists(&self, path: &str) -> Result<()> {
        if !self.storage.exists(path).await? {
            return Ok(());
        }
        match self.storage.delete(path, true).await {
            Err(Error::StoragePathNotFound { .. }) => Ok(()),
            other => other,
        }
    }
}
