//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use checkpoint::{
    CheckpointManager, CheckpointManagerConfig, CoordinationGroup, ShardFileStore, StateDict, Step,
};
use checkpoint_core::logging::{init_tracing, DEFAULT_FILTER};
use checkpoint_core::{Error, Result};
use checkpoint_storage::{LocalStorage, StorageBackend};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// A storage operation observed by [`RecordingStorage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Write(String),
    Delete(String),
}

/// Local storage that records every mutating call in order
pub struct RecordingStorage {
    inner: LocalStorage,
    ops: Mutex<Vec<Op>>,
    fail_matching: Mutex<Option<String>>,
}

impl RecordingStorage {
    pub fn new(root: &Path) -> Self {
        Self {
            inner: LocalStorage::new(root),
            ops: Mutex::new(Vec::new()),
            fail_matching: Mutex::new(None),
        }
    }

    /// Fail every write whose path contains `pattern`
    pub fn fail_writes_matching(&self, pattern: Option<&str>) {
        *self.fail_matching.lock() = pattern.map(str::to_string);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().clone()
    }

    /// Position of the first write to `path`
    pub fn write_index(&self, path: &str) -> Option<usize> {
        self.ops
            .lock()
            .iter()
            .position(|op| *op == Op::Write(path.to_string()))
    }

    pub fn deletes(&self) -> Vec<String> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                Op::Delete(path) => Some(path.clone()),
                Op::Write(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl StorageBackend for RecordingStorage {
    async fn read(&self, path: &str) -> Result<Bytes> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<u64> {
        let pattern = self.fail_matching.lock().clone();
        if let Some(pattern) = pattern {
            if path.contains(&pattern) {
                return Err(Error::Storage {
                    message: format!("injected write failure: {}", path),
                });
            }
        }
        let size = self.inner.write(path, data).await?;
        self.ops.lock().push(Op::Write(path.to_string()));
        Ok(size)
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        self.inner.delete(path, recursive).await?;
        self.ops.lock().push(Op::Delete(path.to_string()));
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        self.inner.list(path).await
    }
}

pub fn init_logging() {
    init_tracing(DEFAULT_FILTER);
}

/// A small state dict whose contents identify the step and rank
pub fn snapshot(step: Step, rank: u32) -> StateDict {
    let mut state = StateDict::new();
    state.insert(
        "model.weight".to_string(),
        Bytes::from(format!("weights step={} rank={}", step, rank)),
    );
    state.insert("optim.state".to_string(), Bytes::from(vec![(step % 251) as u8; 4096]));
    state
}

/// Manager over `storage` with the shard-file store
pub async fn open_manager(
    config: CheckpointManagerConfig,
    storage: Arc<dyn StorageBackend>,
    group: Option<Arc<dyn CoordinationGroup>>,
) -> anyhow::Result<CheckpointManager<ShardFileStore>> {
    let store = Arc::new(ShardFileStore::new(storage.clone()));
    let mut builder = CheckpointManager::builder(config).storage(storage).store(store);
    if let Some(group) = group {
        builder = builder.group(group);
    }
    Ok(builder.build().await?)
}
