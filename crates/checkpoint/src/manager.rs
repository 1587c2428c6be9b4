//! Checkpoint manager façade
//!
//! Ties the ledger, retention policy, synchronous checkpoint operation and
//! async pipeline together behind one handle.

use checkpoint_core::{
    CheckpointManagerConfig, CheckpointMetadata, Error, ManagerState, PipelineStats, Result, Step,
};
use checkpoint_storage::StorageBackend;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::group::{CoordinationGroup, SingleProcessGroup};
use crate::operation::Checkpointer;
use crate::pipeline::AsyncPipeline;
use crate::store::SnapshotStore;

/// Per-step checkpointing with async writes, retention and restore
///
/// Every checkpoint is identified by the step at which it was taken and
/// lives in `base_path/<step>`. Call [`save`](Self::save) or
/// [`save_async`](Self::save_async) every step; the manager decides from
/// `save_interval` whether the step is checkpointed.
///
/// Call [`shutdown`](Self::shutdown) before dropping the manager so the
/// worker drains queued checkpoints while the caller waits. Dropping a
/// running manager closes the queue and lets the worker finish in the
/// background.
pub struct CheckpointManager<S: SnapshotStore> {
    checkpointer: Arc<Checkpointer<S>>,
    pipeline: AsyncPipeline<S>,
    state: RwLock<ManagerState>,
}

impl<S: SnapshotStore> CheckpointManager<S> {
    /// Create a manager, load tracked checkpoints and start the worker
    ///
    /// Without a coordination group the manager runs as a fresh
    /// single-member group.
    pub async fn new(
        config: CheckpointManagerConfig,
        storage: Arc<dyn StorageBackend>,
        store: Arc<S>,
        group: Option<Arc<dyn CoordinationGroup>>,
    ) -> Result<Self> {
        let group = group.unwrap_or_else(|| Arc::new(SingleProcessGroup::new()));
        let queue_size = config.async_queue_size;

        let checkpointer = Arc::new(Checkpointer::open(config, storage, store, group).await?);
        let pipeline = AsyncPipeline::start(checkpointer.clone(), queue_size);

        info!(
            base_path = %checkpointer.config().base_path,
            save_interval = checkpointer.config().save_interval,
            max_to_keep = checkpointer.config().max_to_keep,
            rank = checkpointer.group().rank(),
            tracked = ?checkpointer.all_steps(),
            "Checkpoint manager started"
        );

        Ok(Self {
            checkpointer,
            pipeline,
            state: RwLock::new(ManagerState::Running),
        })
    }

    /// Start building a manager
    pub fn builder(config: CheckpointManagerConfig) -> CheckpointManagerBuilder<S> {
        CheckpointManagerBuilder::new(config)
    }

    /// True if a checkpoint is due at `step`
    pub fn should_save(&self, step: Step) -> bool {
        self.checkpointer.should_save(step)
    }

    /// Take a checkpoint synchronously if `should_save(step)` or `force`
    ///
    /// Returns `Ok(true)` if a checkpoint was taken; `restore(step)` will
    /// then succeed. Errors propagate to the caller.
    pub async fn save(&self, step: Step, snapshot: &S::Snapshot, force: bool) -> Result<bool> {
        self.ensure_running()?;
        self.checkpointer.checkpoint(step, snapshot, force).await
    }

    /// Queue a checkpoint for the background worker if `should_save(step)`
    /// or `force`
    ///
    /// The snapshot is copied to host memory on the caller, then queued.
    /// When the queue is full this waits for the worker to take an item,
    /// which bounds how far the caller can get ahead of storage.
    ///
    /// Returns `Ok(true)` if the checkpoint was queued. Failures of the
    /// write itself are not reported here: they are logged, counted in
    /// [`stats`](Self::stats) and kept in [`last_error`](Self::last_error).
    /// Call [`join`](Self::join) to wait for queued writes.
    pub async fn save_async(&self, step: Step, snapshot: &S::Snapshot, force: bool) -> Result<bool> {
        self.ensure_running()?;
        if !(force || self.should_save(step)) {
            return Ok(false);
        }

        let host_copy = self.checkpointer.store().to_host_copy(snapshot)?;
        self.pipeline.enqueue(step, host_copy).await?;
        Ok(true)
    }

    /// Restore the checkpoint taken at `step` into `target`
    ///
    /// Fails with `UntrackedStep` before touching storage if the step is
    /// not tracked. Waits for an in-flight checkpoint first, so a step that
    /// checkpoint evicts is reported as untracked.
    pub async fn restore(&self, step: Step, target: &mut S::Snapshot) -> Result<()> {
        self.checkpointer.restore(step, target).await
    }

    /// All tracked steps, ascending
    pub fn all_steps(&self) -> Vec<Step> {
        self.checkpointer.all_steps()
    }

    /// Highest tracked step
    pub fn latest_step(&self) -> Option<Step> {
        self.all_steps().last().copied()
    }

    /// Tracked checkpoint metadata, oldest first
    pub fn all_checkpoints(&self) -> Vec<CheckpointMetadata> {
        self.checkpointer.all_checkpoints()
    }

    /// Metadata for a tracked step
    pub fn get_by_step(&self, step: Step) -> Option<CheckpointMetadata> {
        self.checkpointer.get_by_step(step)
    }

    /// Checkpoint directories with no valid ledger entry
    pub async fn find_orphans(&self) -> Result<Vec<String>> {
        self.checkpointer
            .ledger()
            .find_orphans(&self.checkpointer.config().base_path)
            .await
    }

    /// Wait for all queued async checkpoints to finish
    pub async fn join(&self) -> Result<()> {
        self.pipeline.join().await
    }

    /// Async pipeline counters
    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Most recent async checkpoint failure
    pub fn last_error(&self) -> Option<String> {
        self.pipeline.last_error()
    }

    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    pub fn config(&self) -> &CheckpointManagerConfig {
        self.checkpointer.config()
    }

    /// Stop accepting checkpoints, drain the queue and stop the worker
    pub async fn shutdown(&self) -> Result<()> {
        *self.state.write() = ManagerState::Stopped;
        self.pipeline.shutdown().await?;
        info!(stats = ?self.pipeline.stats(), "Checkpoint manager stopped");
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ManagerState::Running => Ok(()),
            ManagerState::Stopped => Err(Error::ManagerStopped),
        }
    }
}

impl<S: SnapshotStore> Drop for CheckpointManager<S> {
    fn drop(&mut self) {
        if *self.state.get_mut() == ManagerState::Running {
            warn!(
                outstanding = self.pipeline.stats().outstanding(),
                "Checkpoint manager dropped without shutdown; queued checkpoints finish in the background \
                 only while the runtime keeps running"
            );
        }
    }
}

/// Thread-safe handle to checkpoint manager
pub type CheckpointManagerHandle<S> = Arc<CheckpointManager<S>>;

/// Builder for CheckpointManager
pub struct CheckpointManagerBuilder<S: SnapshotStore> {
    config: CheckpointManagerConfig,
    storage: Option<Arc<dyn StorageBackend>>,
    store: Option<Arc<S>>,
    group: Option<Arc<dyn CoordinationGroup>>,
}

impl<S: SnapshotStore> CheckpointManagerBuilder<S> {
    pub fn new(config: CheckpointManagerConfig) -> Self {
        Self {
            config,
            storage: None,
            store: None,
            group: None,
        }
    }

    /// Set the blob filesystem holding checkpoint directories
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the snapshot store
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the coordination group
    pub fn group(mut self, group: Arc<dyn CoordinationGroup>) -> Self {
        self.group = Some(group);
        self
    }

    /// Set the retention bound
    pub fn max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.config.max_to_keep = max_to_keep;
        self
    }

    /// Set the async queue capacity
    pub fn async_queue_size(mut self, size: usize) -> Self {
        self.config.async_queue_size = size;
        self
    }

    /// Build the checkpoint manager
    pub async fn build(self) -> Result<CheckpointManager<S>> {
        let storage = self.storage.ok_or_else(|| Error::InvalidConfig {
            message: "a storage backend is required".to_string(),
        })?;
        let store = self.store.ok_or_else(|| Error::InvalidConfig {
            message: "a snapshot store is required".to_string(),
        })?;
        CheckpointManager::new(self.config, storage, store, self.group).await
    }
}
