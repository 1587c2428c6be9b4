//! Async checkpoint pipeline
//!
//! A single background worker drains a bounded queue of snapshots and runs
//! the synchronous checkpoint operation for each, in FIFO order. The queue
//! capacity bounds how far the caller can run ahead of storage: `enqueue`
//! waits while the queue is full.

use checkpoint_core::{Error, PipelineStats, Result, Step};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::operation::Checkpointer;
use crate::store::SnapshotStore;

/// Entry on the checkpoint queue
enum QueueItem<T> {
    /// Checkpoint this snapshot at this step
    Checkpoint { step: Step, snapshot: T },

    /// Stop accepting work; drain what is queued, then exit
    Shutdown,
}

/// Completion accounting shared between producers and the worker
struct Progress {
    /// Items enqueued but not yet finished
    outstanding: watch::Sender<u64>,
    stats: Mutex<PipelineStats>,
    last_error: Mutex<Option<String>>,
}

impl Progress {
    fn new() -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            outstanding,
            stats: Mutex::new(PipelineStats::default()),
            last_error: Mutex::new(None),
        }
    }

    fn begin(&self) {
        self.stats.lock().enqueued += 1;
        self.outstanding.send_modify(|n| *n += 1);
    }

    fn finish(&self, step: Step, result: Result<bool>) {
        match result {
            Ok(_) => {
                self.stats.lock().completed += 1;
            }
            Err(e) => {
                error!(step, error = %e, fatal = e.is_fatal(), "Async checkpoint failed");
                self.stats.lock().failed += 1;
                *self.last_error.lock() = Some(format!("step {}: {}", step, e));
            }
        }
        self.outstanding.send_modify(|n| *n -= 1);
    }
}

/// Background checkpoint worker and its queue
pub struct AsyncPipeline<S: SnapshotStore> {
    tx: Mutex<Option<mpsc::Sender<QueueItem<S::Snapshot>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    progress: Arc<Progress>,
}

impl<S: SnapshotStore> AsyncPipeline<S> {
    /// Start the worker. Must be called from within a Tokio runtime.
    pub fn start(checkpointer: Arc<Checkpointer<S>>, queue_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_size);
        let progress = Arc::new(Progress::new());

        let task = tokio::spawn(Self::worker_loop(checkpointer, rx, progress.clone()));

        Self {
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
            progress,
        }
    }

    /// Main worker loop
    async fn worker_loop(
        checkpointer: Arc<Checkpointer<S>>,
        mut rx: mpsc::Receiver<QueueItem<S::Snapshot>>,
        progress: Arc<Progress>,
    ) {
        info!("Checkpoint worker started");

        while let Some(item) = rx.recv().await {
            match item {
                QueueItem::Checkpoint { step, snapshot } => {
                    debug!(step, "Dequeued async checkpoint");
                    // The gate was evaluated by the producer
                    let result = checkpointer.checkpoint(step, &snapshot, true).await;
                    progress.finish(step, result);
                }
                QueueItem::Shutdown => {
                    debug!("Shutdown requested, draining queue");
                    rx.close();
                }
            }
        }

        info!("Checkpoint worker stopped");
    }

    /// Queue a snapshot, waiting while the queue is full
    pub async fn enqueue(&self, step: Step, snapshot: S::Snapshot) -> Result<()> {
        let tx = self.tx.lock().clone().ok_or(Error::ManagerStopped)?;

        // Reserving is cancel safe: a caller that gives up while waiting
        // leaves no trace in the accounting
        let permit = tx.reserve().await.map_err(|_| Error::ManagerStopped)?;
        self.progress.begin();
        permit.send(QueueItem::Checkpoint { step, snapshot });

        debug!(step, "Queued checkpoint for async write");
        Ok(())
    }

    /// Wait until every item enqueued so far has finished
    pub async fn join(&self) -> Result<()> {
        let mut rx = self.progress.outstanding.subscribe();
        rx.wait_for(|n| *n == 0)
            .await
            .map(|_| ())
            .map_err(|e| Error::ChannelClosed {
                channel: format!("checkpoint progress: {}", e),
            })
    }

    /// Snapshot of the pipeline counters
    pub fn stats(&self) -> PipelineStats {
        *self.progress.stats.lock()
    }

    /// Most recent async failure, if any
    pub fn last_error(&self) -> Option<String> {
        self.progress.last_error.lock().clone()
    }

    /// True once `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Send the shutdown sentinel and wait for the worker to drain and exit
    pub async fn shutdown(&self) -> Result<()> {
        let tx = self.tx.lock().take();
        if let Some(tx) = tx {
            // Waits behind queued checkpoints, which are all still processed
            if tx.send(QueueItem::Shutdown).await.is_err() {
                debug!("Checkpoint worker already gone");
            }
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await.map_err(|e| Error::Internal {
                message: format!("checkpoint worker panicked: {}", e),
            })?;
        }
        Ok(())
    }
}
