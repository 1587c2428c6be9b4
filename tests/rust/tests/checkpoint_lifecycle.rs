//! End-to-end checkpoint lifecycle tests
//!
//! Exercises a single-process manager against the local filesystem:
//! - Interval gating and retention scenarios
//! - Async FIFO ordering and ledger commit order
//! - Idempotent re-saves and crash consistency
//! - Rebuilding tracked state after a restart

mod common;

use anyhow::Result;
use checkpoint::{
    CheckpointManagerConfig, Error, ShardFileStore, SingleProcessGroup, SnapshotStore, StateDict,
};
use checkpoint_core::ManagerSettings;
use checkpoint_storage::{LocalStorage, StorageBackend};
use common::{open_manager, snapshot, Op, RecordingStorage};
use std::sync::Arc;

fn local(dir: &tempfile::TempDir) -> Arc<dyn StorageBackend> {
    Arc::new(LocalStorage::new(dir.path()))
}

#[tokio::test]
async fn test_interval_ten_keep_two() -> Result<()> {
    common::init_logging();
    let dir = tempfile::tempdir()?;
    let config = CheckpointManagerConfig::new("run", 10).with_max_to_keep(2);
    let manager = open_manager(config, local(&dir), None).await?;

    for step in 0..30 {
        let taken = manager.save(step, &snapshot(step, 0), false).await?;
        assert_eq!(taken, step % 10 == 0);
    }

    assert_eq!(manager.all_steps(), vec![10, 20]);
    assert!(!dir.path().join("run/0").exists());
    assert!(dir.path().join("run/10/.manager_metadata").exists());
    assert!(dir.path().join("run/20/.manager_metadata").exists());

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_unbounded_retention_keeps_everything() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = CheckpointManagerConfig::new("run", 1).with_max_to_keep(0);
    let manager = open_manager(config, local(&dir), None).await?;

    for step in 0..100 {
        assert!(manager.save(step, &snapshot(step, 0), false).await?);
    }

    assert_eq!(manager.all_steps(), (0..100).collect::<Vec<_>>());
    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_retention_keeps_most_recent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = CheckpointManagerConfig::new("run", 1).with_max_to_keep(3);
    let manager = open_manager(config, local(&dir), None).await?;

    // Timestamp order, not step order, decides eviction
    for step in [50, 10, 40, 20, 30] {
        manager.save(step, &snapshot(step, 0), false).await?;
        assert!(manager.all_steps().len() <= 3);
    }

    assert_eq!(manager.all_steps(), vec![20, 30, 40]);
    let by_time: Vec<_> = manager.all_checkpoints().iter().map(|m| m.step).collect();
    assert_eq!(by_time, vec![40, 20, 30]);
    Ok(())
}

#[tokio::test]
async fn test_save_then_restore_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manager = open_manager(CheckpointManagerConfig::new("run", 25), local(&dir), None).await?;

    let original = snapshot(75, 0);
    assert!(manager.save(75, &original, false).await?);

    let mut target = StateDict::new();
    manager.restore(75, &mut target).await?;
    assert_eq!(target, original);
    Ok(())
}

#[tokio::test]
async fn test_restore_untracked_lists_valid_steps() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manager = open_manager(CheckpointManagerConfig::new("run", 10), local(&dir), None).await?;
    manager.save(10, &snapshot(10, 0), false).await?;
    manager.save(20, &snapshot(20, 0), false).await?;

    let mut target = StateDict::new();
    match manager.restore(15, &mut target).await {
        Err(Error::UntrackedStep { step, valid_steps }) => {
            assert_eq!(step, 15);
            assert_eq!(valid_steps, vec![10, 20]);
        }
        other => panic!("expected UntrackedStep, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_forced_resave_keeps_one_entry() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = Arc::new(RecordingStorage::new(dir.path()));
    let manager = open_manager(CheckpointManagerConfig::new("run", 100), storage.clone(), None).await?;

    assert!(manager.save(7, &snapshot(7, 0), true).await?);
    assert!(manager.save(7, &snapshot(8, 0), true).await?);

    assert_eq!(manager.all_steps(), vec![7]);
    assert_eq!(manager.all_checkpoints().len(), 1);
    assert_eq!(storage.deletes(), vec!["run/7".to_string()]);

    let mut target = StateDict::new();
    manager.restore(7, &mut target).await?;
    assert_eq!(target, snapshot(8, 0));
    Ok(())
}

#[tokio::test]
async fn test_async_saves_commit_in_fifo_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = Arc::new(RecordingStorage::new(dir.path()));
    let config = CheckpointManagerConfig::new("run", 10).with_async_queue_size(2);
    let manager = open_manager(config, storage.clone(), None).await?;

    let steps = [30, 10, 20];
    for step in steps {
        assert!(manager.save_async(step, &snapshot(step, 0), false).await?);
    }
    manager.join().await?;

    assert_eq!(manager.all_steps(), vec![10, 20, 30]);
    let by_time: Vec<_> = manager.all_checkpoints().iter().map(|m| m.step).collect();
    assert_eq!(by_time, steps.to_vec());

    for pair in steps.windows(2) {
        let committed = storage
            .write_index(&format!("run/{}/.manager_metadata", pair[0]))
            .expect("ledger entry written");
        let next_write = storage
            .write_index(&format!("run/{}/shard-00000.ckpt", pair[1]))
            .expect("shard written");
        assert!(
            committed < next_write,
            "step {} must be committed before step {} is written",
            pair[0],
            pair[1]
        );
    }

    // Data always lands before the ledger entry of the same step
    for step in steps {
        let data = storage.write_index(&format!("run/{}/shard-00000.ckpt", step)).unwrap();
        let ledger = storage.write_index(&format!("run/{}/.manager_metadata", step)).unwrap();
        assert!(data < ledger);
    }

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_async_gate_skips_off_interval_steps() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manager = open_manager(CheckpointManagerConfig::new("run", 4), local(&dir), None).await?;

    let mut queued = 0;
    for step in 1..=12 {
        if manager.save_async(step, &snapshot(step, 0), false).await? {
            queued += 1;
        }
    }
    assert!(manager.save_async(13, &snapshot(13, 0), true).await?);
    manager.shutdown().await?;

    assert_eq!(queued, 3);
    assert_eq!(manager.all_steps(), vec![4, 8, 12, 13]);
    assert_eq!(manager.stats().completed, 4);
    Ok(())
}

#[tokio::test]
async fn test_data_without_ledger_is_not_tracked() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = local(&dir);
    let config = CheckpointManagerConfig::new("run", 10);

    {
        let manager = open_manager(config.clone(), storage.clone(), None).await?;
        manager.save(10, &snapshot(10, 0), false).await?;
        manager.shutdown().await?;
    }

    // Simulate a crash after the data write but before the ledger commit
    let store = ShardFileStore::new(storage.clone());
    store.write("run/20", &snapshot(20, 0), &SingleProcessGroup).await?;

    let manager = open_manager(config, storage, None).await?;
    assert_eq!(manager.all_steps(), vec![10]);
    assert_eq!(manager.find_orphans().await?, vec!["run/20".to_string()]);

    let mut target = StateDict::new();
    assert!(matches!(
        manager.restore(20, &mut target).await,
        Err(Error::UntrackedStep { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_restart_from_settings() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let json = format!(
        r#"{{
            "checkpoint": {{"base_path": "exp/run-1", "save_interval": 5, "max_to_keep": 2, "async_queue_size": 2}},
            "storage": {{"Local": {{"root": "{}"}}}}
        }}"#,
        dir.path().display()
    );
    let settings = ManagerSettings::from_json(&json)?;

    {
        let storage = checkpoint_storage::from_config(&settings.storage).await?;
        let manager = open_manager(settings.checkpoint.clone(), storage, None).await?;
        for step in 0..=20 {
            manager.save_async(step, &snapshot(step, 0), false).await?;
        }
        manager.shutdown().await?;
        assert_eq!(manager.all_steps(), vec![15, 20]);
    }

    let storage = checkpoint_storage::from_config(&settings.storage).await?;
    let manager = open_manager(settings.checkpoint, storage, None).await?;
    assert_eq!(manager.all_steps(), vec![15, 20]);

    let mut target = StateDict::new();
    manager.restore(20, &mut target).await?;
    assert_eq!(target, snapshot(20, 0));

    // Evicted checkpoint directories are gone from storage
    let remaining: Vec<_> = std::fs::read_dir(dir.path().join("exp/run-1"))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(remaining.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_recording_storage_sees_retention_deletes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = Arc::new(RecordingStorage::new(dir.path()));
    let config = CheckpointManagerConfig::new("run", 1).with_max_to_keep(1);
    let manager = open_manager(config, storage.clone(), None).await?;

    for step in 1..=3 {
        manager.save(step, &snapshot(step, 0), false).await?;
    }

    assert_eq!(manager.all_steps(), vec![3]);
    assert_eq!(storage.deletes(), vec!["run/1".to_string(), "run/2".to_string()]);
    assert!(storage.ops().contains(&Op::Write("run/3/.manager_metadata".to_string())));
    Ok(())
}
