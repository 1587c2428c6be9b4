//! Snapshot stores
//!
//! A snapshot store moves one distributed snapshot to and from a checkpoint
//! directory. Both directions are collective: every rank of the group calls
//! them with the same path, and the call only succeeds if it succeeded on
//! every rank.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use checkpoint_core::{Error, Rank, Result};
use checkpoint_storage::{join_path, StorageBackend};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::group::CoordinationGroup;

/// Persists snapshots into checkpoint directories
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// In-memory snapshot representation, opaque to the manager
    type Snapshot: Send + Sync + 'static;

    /// Collectively write `snapshot` under `path`
    async fn write(
        &self,
        path: &str,
        snapshot: &Self::Snapshot,
        group: &dyn CoordinationGroup,
    ) -> Result<()>;

    /// Collectively read the snapshot under `path` into `target`
    async fn read(
        &self,
        path: &str,
        target: &mut Self::Snapshot,
        group: &dyn CoordinationGroup,
    ) -> Result<()>;

    /// Produce an independent host-resident copy safe to hand to the
    /// background writer while the caller keeps mutating the original
    fn to_host_copy(&self, snapshot: &Self::Snapshot) -> Result<Self::Snapshot>;
}

/// A flat state dict: named byte buffers, one set per rank
pub type StateDict = BTreeMap<String, Bytes>;

/// Magic bytes for shard files
pub const SHARD_MAGIC: [u8; 4] = *b"CKPT";

/// Shard file format version
pub const SHARD_VERSION: u32 = 1;

/// Fixed-size part of the shard header: magic, version, rank, world size,
/// index length
const FIXED_HEADER_LEN: usize = 4 + 4 + 4 + 4 + 4;

/// Entry table stored after the fixed header
#[derive(Debug, Serialize, Deserialize)]
struct ShardIndex {
    entries: Vec<(String, u64)>,
}

/// Snapshot store writing one shard file per rank
///
/// Layout: `path/shard-<rank>.ckpt`, each holding that rank's state dict.
#[derive(Clone)]
pub struct ShardFileStore {
    storage: Arc<dyn StorageBackend>,
}

impl ShardFileStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Path of a rank's shard file inside a checkpoint directory
    pub fn shard_path(path: &str, rank: Rank) -> String {
        join_path(path, &format!("shard-{:05}.ckpt", rank))
    }

    /// Encode a state dict as header + index + concatenated payloads
    pub fn encode(state: &StateDict, rank: Rank, world_size: u32) -> Result<Bytes> {
        let index = ShardIndex {
            entries: state
                .iter()
                .map(|(name, data)| (name.clone(), data.len() as u64))
                .collect(),
        };
        let index_bytes = bincode::serialize(&index)?;
        let payload_len: usize = state.values().map(Bytes::len).sum();

        let mut buf = BytesMut::with_capacity(FIXED_HEADER_LEN + index_bytes.len() + payload_len);
        buf.put_slice(&SHARD_MAGIC);
        buf.put_u32_le(SHARD_VERSION);
        buf.put_u32_le(rank);
        buf.put_u32_le(world_size);
        buf.put_u32_le(index_bytes.len() as u32);
        buf.put_slice(&index_bytes);
        for data in state.values() {
            buf.put_slice(data);
        }

        Ok(buf.freeze())
    }

    /// Decode a shard file, slicing payloads out of `data` without copying
    pub fn decode(path: &str, data: Bytes) -> Result<StateDict> {
        let corrupted = |reason: &str| Error::CheckpointCorrupted {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if data.len() < FIXED_HEADER_LEN {
            return Err(corrupted("truncated header"));
        }
        if data[..4] != SHARD_MAGIC {
            return Err(corrupted("invalid magic"));
        }

        let read_u32 = |offset: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&data[offset..offset + 4]);
            u32::from_le_bytes(word)
        };

        let version = read_u32(4);
        if version != SHARD_VERSION {
            warn!(path, expected = SHARD_VERSION, got = version, "Shard version mismatch");
        }

        let index_len = read_u32(16) as usize;
        let index_end = FIXED_HEADER_LEN + index_len;
        if data.len() < index_end {
            return Err(corrupted("truncated index"));
        }
        let index: ShardIndex = bincode::deserialize(&data[FIXED_HEADER_LEN..index_end])?;

        let mut state = StateDict::new();
        let mut offset = index_end;
        for (name, len) in index.entries {
            let end = usize::try_from(len)
                .ok()
                .and_then(|len| offset.checked_add(len))
                .filter(|&end| end <= data.len())
                .ok_or_else(|| corrupted("truncated payload"))?;
            state.insert(name, data.slice(offset..end));
            offset = end;
        }

        Ok(state)
    }
}

#[async_trait]
impl SnapshotStore for ShardFileStore {
    type Snapshot = StateDict;

    #[instrument(skip(self, snapshot, group), fields(rank = group.rank()))]
    async fn write(
        &self,
        path: &str,
        snapshot: &StateDict,
        group: &dyn CoordinationGroup,
    ) -> Result<()> {
        let start = std::time::Instant::now();
        let shard_path = Self::shard_path(path, group.rank());

        let local = match Self::encode(snapshot, group.rank(), group.world_size()) {
            Ok(data) => self.storage.write(&shard_path, data).await,
            Err(e) => Err(e),
        };

        let all_ok = group.all_ok("snapshot-write", local.is_ok()).await?;
        let size = local?;
        if !all_ok {
            return Err(Error::SnapshotWriteFailed {
                path: path.to_string(),
                message: "write failed on another rank".to_string(),
            });
        }

        let elapsed = start.elapsed();
        info!(
            path,
            size_bytes = size,
            elapsed_ms = elapsed.as_millis(),
            throughput_mbps = (size as f64 / 1024.0 / 1024.0) / elapsed.as_secs_f64().max(1e-9),
            "Shard write complete"
        );
        Ok(())
    }

    #[instrument(skip(self, target, group), fields(rank = group.rank()))]
    async fn read(
        &self,
        path: &str,
        target: &mut StateDict,
        group: &dyn CoordinationGroup,
    ) -> Result<()> {
        let shard_path = Self::shard_path(path, group.rank());

        let local = match self.storage.read(&shard_path).await {
            Ok(data) => Self::decode(&shard_path, data),
            Err(e) => Err(e),
        };

        let all_ok = group.all_ok("snapshot-read", local.is_ok()).await?;
        let loaded = local?;
        if !all_ok {
            return Err(Error::SnapshotReadFailed {
                path: path.to_string(),
                message: "read failed on another rank".to_string(),
            });
        }

        debug!(path, entries = loaded.len(), "Shard read complete");
        target.extend(loaded);
        Ok(())
    }

    fn to_host_copy(&self, snapshot: &StateDict) -> Result<StateDict> {
        // Bytes are immutable and reference counted, so a shallow clone is
        // already independent of anything the caller does next
        Ok(snapshot.clone())
    }
}
