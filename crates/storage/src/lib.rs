//! Checkpoint Storage - Blob filesystem backends for the checkpoint manager
//!
//! Provides async storage operations with support for:
//! - Local filesystem (default feature)
//! - Amazon S3 / S3-compatible storage (with `s3` feature)
//!
//! # Example
//!
//! ```no_run
//! use checkpoint_storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # async fn example() -> checkpoint_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/checkpoints");
//! storage.write("run-1/100/.manager_metadata", Bytes::from_static(b"{}")).await?;
//! let steps = storage.list("run-1").await?;
//! storage.delete("run-1/100", true).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod local;

#[cfg(feature = "s3")]
mod s3;

use std::sync::Arc;

use checkpoint_core::{Result, StorageConfig};

pub use backend::{file_name, join_path, StorageBackend};
pub use local::LocalStorage;

#[cfg(feature = "s3")]
pub use s3::{S3Config, S3Storage};

/// Build a storage backend from configuration
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Local { root } => Ok(Arc::new(LocalStorage::new(root))),
        #[cfg(feature = "s3")]
        StorageConfig::S3 {
            bucket,
            prefix,
            endpoint,
            region,
        } => {
            let storage = S3Storage::with_config(S3Config {
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                endpoint_url: endpoint.clone(),
                region: region.clone().or_else(|| S3Config::default().region),
                force_path_style: endpoint.is_some(),
            })
            .await;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3 { .. } => Err(checkpoint_core::Error::StorageUnavailable {
            backend: "s3 (built without the `s3` feature)".to_string(),
        }),
    }
}
