//! Multi-rank checkpointing over an in-process coordination group
//!
//! Each rank runs its own manager against a shared storage root, the way
//! separate processes would share a filesystem.

mod common;

use anyhow::Result;
use checkpoint::{
    CheckpointManagerConfig, CoordinationGroup, Error, LocalGroup, StateDict, Step,
};
use common::{open_manager, snapshot, RecordingStorage};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const WORLD_SIZE: u32 = 4;

/// What one rank observed during a run
#[derive(Debug)]
struct RankReport {
    rank: u32,
    steps: Vec<Step>,
    deletes: Vec<String>,
    restored: StateDict,
}

/// Run `body` once per rank, each on its own task, and collect the reports
async fn run_ranks<F, Fut>(root: &Path, body: F) -> Result<Vec<RankReport>>
where
    F: Fn(Arc<dyn CoordinationGroup>, Arc<RecordingStorage>) -> Fut,
    Fut: Future<Output = Result<RankReport>> + Send + 'static,
{
    let mut handles = Vec::new();
    for group in LocalGroup::new(WORLD_SIZE)? {
        let storage = Arc::new(RecordingStorage::new(root));
        handles.push(tokio::spawn(body(Arc::new(group), storage)));
    }

    let mut reports = Vec::new();
    for handle in handles {
        let report = handle.await??;
        info!(rank = report.rank, steps = ?report.steps, deletes = report.deletes.len(), "Rank finished");
        reports.push(report);
    }
    reports.sort_by_key(|r| r.rank);
    Ok(reports)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ranks_agree_and_only_leader_deletes() -> Result<()> {
    common::init_logging();
    let dir = tempfile::tempdir()?;
    let root = PathBuf::from(dir.path());

    let reports = run_ranks(&root, |group, storage| async move {
        let rank = group.rank();
        let config = CheckpointManagerConfig::new("run", 10).with_max_to_keep(2);
        let manager = open_manager(config, storage.clone(), Some(group)).await?;

        for step in 0..=40 {
            manager.save(step, &snapshot(step, rank), false).await?;
        }

        let mut restored = StateDict::new();
        manager.restore(40, &mut restored).await?;
        manager.shutdown().await?;

        Ok(RankReport {
            rank,
            steps: manager.all_steps(),
            deletes: storage.deletes(),
            restored,
        })
    })
    .await?;

    for report in &reports {
        assert_eq!(report.steps, vec![30, 40], "rank {}", report.rank);
        assert_eq!(report.restored, snapshot(40, report.rank));
        if report.rank == 0 {
            assert_eq!(report.deletes, vec!["run/0", "run/10", "run/20"]);
        } else {
            assert!(report.deletes.is_empty(), "rank {} deleted {:?}", report.rank, report.deletes);
        }
    }

    for rank in 0..WORLD_SIZE {
        assert!(root.join(format!("run/40/shard-{:05}.ckpt", rank)).exists());
    }
    assert!(!root.join("run/20").exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_saves_across_ranks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = PathBuf::from(dir.path());

    let reports = run_ranks(&root, |group, storage| async move {
        let rank = group.rank();
        let config = CheckpointManagerConfig::new("run", 5)
            .with_max_to_keep(3)
            .with_async_queue_size(2);
        let manager = open_manager(config, storage.clone(), Some(group)).await?;

        for step in 1..=30 {
            manager.save_async(step, &snapshot(step, rank), false).await?;
        }
        manager.join().await?;
        assert_eq!(manager.stats().failed, 0);

        let mut restored = StateDict::new();
        manager.restore(25, &mut restored).await?;
        manager.shutdown().await?;

        Ok(RankReport {
            rank,
            steps: manager.all_steps(),
            deletes: storage.deletes(),
            restored,
        })
    })
    .await?;

    for report in &reports {
        assert_eq!(report.steps, vec![20, 25, 30], "rank {}", report.rank);
        assert_eq!(report.restored, snapshot(25, report.rank));
        assert_eq!(report.deletes.is_empty(), report.rank != 0);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_on_one_rank_fails_every_rank() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = PathBuf::from(dir.path());

    let reports = run_ranks(&root, |group, storage| async move {
        let rank = group.rank();
        if rank == 2 {
            storage.fail_writes_matching(Some("shard-00002"));
        }
        let config = CheckpointManagerConfig::new("run", 10);
        let manager = open_manager(config, storage.clone(), Some(group)).await?;

        let result = manager.save(10, &snapshot(10, rank), false).await;
        assert!(
            matches!(result, Err(Error::Storage { .. }) | Err(Error::SnapshotWriteFailed { .. })),
            "rank {} got {:?}",
            rank,
            result
        );
        assert!(manager.all_steps().is_empty());

        // The group recovers once the fault clears
        storage.fail_writes_matching(None);
        assert!(manager.save(20, &snapshot(20, rank), false).await?);

        let mut restored = StateDict::new();
        manager.restore(20, &mut restored).await?;
        let orphans = manager.find_orphans().await?;
        manager.shutdown().await?;

        assert_eq!(orphans, vec!["run/10".to_string()]);
        Ok(RankReport {
            rank,
            steps: manager.all_steps(),
            deletes: storage.deletes(),
            restored,
        })
    })
    .await?;

    for report in &reports {
        assert_eq!(report.steps, vec![20]);
        assert_eq!(report.restored, snapshot(20, report.rank));
    }
    assert!(!root.join("run/10/.manager_metadata").exists());
    Ok(())
}
