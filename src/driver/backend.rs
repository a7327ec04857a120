//! Driver trait for the file service.

use super::types::{FileRevision, ListingOptions};
use crate::error::Result;
use async_trait::async_trait;

/// Backend trait for scoped file storage.
///
/// All drivers must be thread-safe (`Send + Sync`) for use with tokio; one
/// instance is shared by every scope of a process. No in-process lock guards
/// a driver, so drivers rely on their backend's own concurrency control.
///
/// # Example
///
/// ```ignore
/// use ghostfs::driver::{DatabaseStorageDriver, StorageDriver};
///
/// let driver = DatabaseStorageDriver::memory()?;
/// driver.upsert_file("data/global/a.json", b"{}", true).await?;
/// let content = driver.read_file("data/global/a.json").await?;
/// ```
#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// Short driver name for logs.
    fn name(&self) -> &'static str;

    /// Creates or overwrites the file at `path`.
    ///
    /// Intermediate directories (or rows) are created as needed. When
    /// `record_revision` is true, drivers that track revisions durably record
    /// that `path` changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    async fn upsert_file(&self, path: &str, content: &[u8], record_revision: bool) -> Result<()>;

    /// Reads the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if the file is
    /// absent, or a driver error if the read fails.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Returns true if `path` exists. Never fails: lookup errors yield `false`.
    async fn file_exists(&self, path: &str) -> bool;

    /// Deletes the file at `path`. Deleting a missing file succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend delete fails.
    async fn delete_file(&self, path: &str, record_revision: bool) -> Result<()>;

    /// Recursively removes everything under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend delete fails.
    async fn delete_dir(&self, path: &str) -> Result<()>;

    /// Renames `from` to `to`, replacing any existing destination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) if `from` is
    /// absent, or a driver error if the rename fails.
    async fn move_file(&self, from: &str, to: &str) -> Result<()>;

    /// Lists files under `path`, relative to it and sorted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) when the directory
    /// does not exist (callers map this to an empty listing), or a driver
    /// error for any other failure.
    async fn directory_listing(&self, path: &str, options: &ListingOptions)
    -> Result<Vec<String>>;

    /// Lists outstanding revisions under `base_dir`. Drivers without revision
    /// tracking return an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the revision log cannot be read.
    async fn list_revisions(&self, base_dir: &str) -> Result<Vec<FileRevision>>;

    /// Removes one revision from the log. No-op for drivers without revisions.
    ///
    /// # Errors
    ///
    /// Returns an error if the revision log cannot be written.
    async fn delete_revision(&self, path: &str, revision: &str) -> Result<()>;
}
