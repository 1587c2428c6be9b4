//! Checkpoint management for distributed training
//!
//! Provides per-step checkpointing with a background writer, a durable
//! metadata ledger, retention, and collective restore across the ranks of a
//! coordination group.

pub mod group;
pub mod ledger;
pub mod manager;
pub mod operation;
pub mod pipeline;
pub mod retention;
pub mod store;


pub use checkpoint_core::{CheckpointManagerConfig, CheckpointMetadata, Error, Result, Step};
pub use group::{CoordinationGroup, LocalGroup, SingleProcessGroup};
pub use ledger::Ledger;
pub use manager::{CheckpointManager, CheckpointManagerBuilder, CheckpointManagerHandle};
pub use operation::Checkpointer;
pub use pipeline::AsyncPipeline;
pub use retention::RetentionPolicy;
pub use store::{ShardFileStore, SnapshotStore, StateDict};
