//! Coordination groups
//!
//! A coordination group is the set of ranks that take part in one logical
//! checkpoint. The manager only needs a rank, a world size, and a collective
//! agreement primitive; the transport behind it is up to the implementor.

use async_trait::async_trait;
use checkpoint_core::{Error, Rank, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Barrier;
use tracing::{debug, warn};

/// Collective coordination across the ranks of a checkpoint
#[async_trait]
pub trait CoordinationGroup: Send + Sync {
    /// Rank of this process within the group
    fn rank(&self) -> Rank;

    /// Number of ranks in the group
    fn world_size(&self) -> u32;

    /// Collective AND: every rank contributes `local_ok` and every rank
    /// receives `true` only if all of them passed `true`.
    ///
    /// Completes once every rank has called it with the same `tag`.
    async fn all_ok(&self, tag: &str, local_ok: bool) -> Result<bool>;

    /// Block until every rank reaches this point
    async fn barrier(&self, tag: &str) -> Result<()> {
        self.all_ok(tag, true).await.map(|_| ())
    }

    /// The single rank allowed to mutate shared storage (deletes, ledger)
    fn is_leader(&self) -> bool {
        self.rank() == 0
    }
}

/// A group containing only the calling process
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcessGroup;

impl SingleProcessGroup {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CoordinationGroup for SingleProcessGroup {
    fn rank(&self) -> Rank {
        0
    }

    fn world_size(&self) -> u32 {
        1
    }

    async fn all_ok(&self, _tag: &str, local_ok: bool) -> Result<bool> {
        Ok(local_ok)
    }
}

/// Shared state behind a set of [`LocalGroup`] handles
#[derive(Debug)]
struct LocalGroupShared {
    barrier: Barrier,
    agreement: Mutex<bool>,
}

/// In-process group of `world_size` ranks, one handle per rank
///
/// Each rank runs in its own task; collectives rendezvous on a shared
/// barrier. Useful for exercising multi-rank behaviour in a single process.
#[derive(Debug, Clone)]
pub struct LocalGroup {
    rank: Rank,
    world_size: u32,
    shared: Arc<LocalGroupShared>,
}

impl LocalGroup {
    /// Create handles for every rank of a new group
    pub fn new(world_size: u32) -> Result<Vec<LocalGroup>> {
        if world_size == 0 {
            return Err(Error::InvalidConfig {
                message: "world_size must be positive".to_string(),
            });
        }

        let shared = Arc::new(LocalGroupShared {
            barrier: Barrier::new(world_size as usize),
            agreement: Mutex::new(true),
        });

        Ok((0..world_size)
            .map(|rank| LocalGroup {
                rank,
                world_size,
                shared: shared.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl CoordinationGroup for LocalGroup {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    async fn all_ok(&self, tag: &str, local_ok: bool) -> Result<bool> {
        debug!(rank = self.rank, tag, local_ok, "Entering collective");

        {
            let mut agreement = self.shared.agreement.lock();
            *agreement &= local_ok;
        }

        // Everyone has contributed
        self.shared.barrier.wait().await;
        let result = *self.shared.agreement.lock();

        // Everyone has read; the leader resets for the next round
        if self.shared.barrier.wait().await.is_leader() {
            *self.shared.agreement.lock() = true;
        }

        // Reset is visible before anyone starts the next round
        self.shared.barrier.wait().await;

        if !result {
            warn!(rank = self.rank, tag, "Collective reported failure on some rank");
        }
        Ok(result)
    }
}
