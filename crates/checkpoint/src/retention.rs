//! Retention policy for tracked checkpoints

use checkpoint_core::CheckpointMetadata;
use std::collections::VecDeque;

/// Keep at most `max_to_keep` checkpoints, evicting oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum number of checkpoints to keep (0 = unbounded)
    pub max_to_keep: usize,
}

impl RetentionPolicy {
    pub fn new(max_to_keep: usize) -> Self {
        Self { max_to_keep }
    }

    /// True if the policy never evicts anything
    pub fn is_unbounded(&self) -> bool {
        self.max_to_keep == 0
    }

    /// Remove checkpoints from the front of `tracked` (oldest timestamp)
    /// until the bound holds, returning the evicted entries in eviction
    /// order. The caller is responsible for deleting their data.
    pub fn apply(&self, tracked: &mut VecDeque<CheckpointMetadata>) -> Vec<CheckpointMetadata> {
        if self.is_unbounded() {
            return Vec::new();
        }

        let excess = tracked.len().saturating_sub(self.max_to_keep);
        tracked.drain(..excess).collect()
    }
}
