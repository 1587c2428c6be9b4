//! Core type definitions for the checkpoint manager

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Training step counter
pub type Step = u64;

/// Rank of a process within a coordination group
pub type Rank = u32;

/// Name of the ledger file stored inside every checkpoint directory
pub const MANAGER_METADATA_FILE: &str = ".manager_metadata";

/// Ledger record for a completed checkpoint
///
/// One record exists per checkpoint directory. Its presence is what makes
/// the checkpoint visible when the tracked list is rebuilt from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Training step at which the checkpoint was taken
    pub step: Step,

    /// Time at which the checkpoint was taken
    pub ts: DateTime<Utc>,
}

impl CheckpointMetadata {
    /// Create metadata stamped with the current wall-clock time
    pub fn now(step: Step) -> Self {
        Self { step, ts: Utc::now() }
    }

    /// Ordering used for the tracked list: timestamp first, then step
    pub fn chronological(a: &Self, b: &Self) -> Ordering {
        a.ts.cmp(&b.ts).then(a.step.cmp(&b.step))
    }
}

/// Lifecycle state of a checkpoint manager
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ManagerState {
    /// Background worker is accepting checkpoints
    Running,

    /// Worker has been told to drain and exit
    Stopped,
}

/// Counters describing the async checkpoint pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Items accepted onto the queue
    pub enqueued: u64,

    /// Items whose checkpoint completed successfully
    pub completed: u64,

    /// Items whose checkpoint failed
    pub failed: u64,
}

impl PipelineStats {
    /// Items enqueued but not yet finished
    pub fn outstanding(&self) -> u64 {
        self.enqueued - self.completed - self.failed
    }
}
