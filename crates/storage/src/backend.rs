//! Storage backend trait definition
//!
//! Defines the async blob filesystem interface that all storage backends
//! must implement. Paths are `/`-separated and relative to the backend root.

use async_trait::async_trait;
use bytes::Bytes;
use checkpoint_core::Result;

/// Async trait for storage backends
///
/// Implementors provide the blob filesystem operations the checkpoint
/// manager needs: whole-object reads and writes, directory listing,
/// existence checks and (recursive) deletion.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the object at the given path
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the path doesn't exist
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Write data to the given path
    ///
    /// Creates parent directories if they don't exist.
    /// Uses atomic writes where possible (write to temp, then rename).
    ///
    /// # Returns
    /// Number of bytes written
    async fn write(&self, path: &str, data: Bytes) -> Result<u64>;

    /// Delete the object or directory at the given path
    ///
    /// With `recursive` set, everything under `path` is removed as well.
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the path doesn't exist
    async fn delete(&self, path: &str, recursive: bool) -> Result<()>;

    /// Check if a path exists, as an object or as a directory
    async fn exists(&self, path: &str) -> Result<bool>;

    /// List the immediate children of a directory
    ///
    /// # Returns
    /// Sorted child paths, each of the form `path/<name>`
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the directory doesn't exist
    async fn list(&self, path: &str) -> Result<Vec<String>>;
}

/// Join two backend-relative path segments with a single `/`
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, child)
    }
}

/// Last segment of a backend-relative path
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}
