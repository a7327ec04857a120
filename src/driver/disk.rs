//! Disk-backed storage driver.
//!
//! Files live under `<root>/<normalized path>` verbatim. Writes go to a
//! temporary file in the destination directory that is then renamed over the
//! target, so readers never observe a half-written file.

use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::backend::StorageDriver;
use super::listing::filter_listing;
use super::types::{FileRevision, ListingOptions};
use crate::error::{Error, Result};

/// Disk storage driver.
///
/// Relative paths resolve against `root`; absolute paths (used by trusted
/// imports) are taken as-is.
///
/// # Thread Safety
///
/// `DiskStorageDriver` is `Clone` and can be shared across threads. The
/// filesystem's rename atomicity is the only concurrency control.
#[derive(Debug, Clone)]
pub struct DiskStorageDriver {
    root: PathBuf,
}

impl DiskStorageDriver {
    /// Creates a driver resolving paths against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory relative paths resolve against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of a normalized path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        // Joining an absolute path replaces the root
        self.root.join(path)
    }

    /// Lists every file under an absolute directory, relative to it.
    ///
    /// Dot files are included so that an export can be re-imported verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `dir` does not exist, or a driver error
    /// if the directory cannot be read.
    pub async fn absolute_directory_listing(&self, dir: &Path) -> Result<Vec<String>> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let files = list_files(&dir)?;
            filter_listing(files, &ListingOptions::new(&[], true))
        })
        .await?
    }

    fn upsert_sync(&self, path: &str, content: &[u8]) -> Result<()> {
        let file_path = self.resolve(path);
        let parent = file_path
            .parent()
            .ok_or_else(|| Error::not_found(path))?
            .to_path_buf();

        fs::create_dir_all(&parent).map_err(|e| {
            Error::driver(format!("Failed to create parent directories for: {path}"), e)
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| Error::driver(format!("Failed to create temp file for: {path}"), e))?;
        tmp.write_all(content)
            .map_err(|e| Error::driver(format!("Failed to write file: {path}"), e))?;
        tmp.persist(&file_path)
            .map_err(|e| Error::driver(format!("Failed to persist file: {path}"), e.error))?;

        Ok(())
    }

    fn delete_sync(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve(path)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::driver(
                format!("Failed to delete file: {path}"),
                e,
            )),
            _ => Ok(()),
        }
    }

    fn delete_dir_sync(&self, path: &str) -> Result<()> {
        match fs::remove_dir_all(self.resolve(path)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::driver(
                format!("Failed to delete directory: {path}"),
                e,
            )),
            _ => Ok(()),
        }
    }

    fn move_sync(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.resolve(from);
        let to_path = self.resolve(to);

        if !from_path.is_file() {
            return Err(Error::not_found(from));
        }
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::driver(format!("Failed to create parent directories for: {to}"), e)
            })?;
        }

        fs::rename(&from_path, &to_path)
            .map_err(|e| Error::io(format!("Failed to move {from} to {to}"), from, e))
    }

    fn listing_sync(&self, path: &str, options: &ListingOptions) -> Result<Vec<String>> {
        let dir = self.resolve(path);
        let files = list_files(&dir).map_err(|e| match e {
            Error::NotFound { .. } => Error::not_found(path),
            other => other,
        })?;
        filter_listing(files, options)
    }
}

/// Recursively collects files under `dir` as forward-slash relative paths.
fn list_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(Error::not_found(dir.display().to_string()));
    }

    let mut files = Vec::new();
    scan_directory(dir, dir, &mut files)?;
    Ok(files)
}

fn scan_directory(base_dir: &Path, dir: &Path, files: &mut Vec<String>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::driver(format!("Failed to read directory: {}", dir.display()), e)
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| Error::driver("Failed to read directory entry", e))?;
        let path = entry.path();

        if path.is_dir() {
            scan_directory(base_dir, &path, files)?;
        } else if path.is_file()
            && let Ok(relative) = path.strip_prefix(base_dir)
        {
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }

    Ok(())
}

#[async_trait]
impl StorageDriver for DiskStorageDriver {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn upsert_file(&self, path: &str, content: &[u8], _record_revision: bool) -> Result<()> {
        debug!(path, size = content.len(), "Disk upsert");
        let driver = self.clone();
        let path = path.to_string();
        let content = content.to_vec();
        tokio::task::spawn_blocking(move || driver.upsert_sync(&path, &content)).await?
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.resolve(path))
            .await
            .map_err(|e| Error::io(format!("Failed to read file: {path}"), path, e))
    }

    async fn file_exists(&self, path: &str) -> bool {
        tokio::fs::metadata(self.resolve(path))
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    async fn delete_file(&self, path: &str, _record_revision: bool) -> Result<()> {
        let driver = self.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || driver.delete_sync(&path)).await?
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        let driver = self.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || driver.delete_dir_sync(&path)).await?
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let driver = self.clone();
        let from = from.to_string();
        let to = to.to_string();
        tokio::task::spawn_blocking(move || driver.move_sync(&from, &to)).await?
    }

    async fn directory_listing(
        &self,
        path: &str,
        options: &ListingOptions,
    ) -> Result<Vec<String>> {
        let driver = self.clone();
        let path = path.to_string();
        let options = options.clone();
        tokio::task::spawn_blocking(move || driver.listing_sync(&path, &options)).await?
    }

    async fn list_revisions(&self, _base_dir: &str) -> Result<Vec<FileRevision>> {
        Ok(Vec::new())
    }

    async fn delete_revision(&self, _path: &str, _revision: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_driver() -> (DiskStorageDriver, TempDir) {
        let tmp = TempDir::new().unwrap();
        (DiskStorageDriver::new(tmp.path()), tmp)
    }

    #[tokio::test]
    async fn test_upsert_and_read() {
        let (driver, tmp) = create_driver();

        driver
            .upsert_file("data/global/a/b/c.json", b"{}", true)
            .await
            .unwrap();

        assert_eq!(driver.read_file("data/global/a/b/c.json").await.unwrap(), b"{}");
        assert!(tmp.path().join("data/global/a/b/c.json").is_file());
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let (driver, tmp) = create_driver();

        driver.upsert_file("data/x.txt", b"one", false).await.unwrap();
        driver.upsert_file("data/x.txt", b"two", false).await.unwrap();

        assert_eq!(driver.read_file("data/x.txt").await.unwrap(), b"two");
        let entries: Vec<_> = fs::read_dir(tmp.path().join("data")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (driver, _tmp) = create_driver();
        let err = driver.read_file("data/missing.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_file_exists() {
        let (driver, _tmp) = create_driver();
        assert!(!driver.file_exists("data/a.json").await);

        driver.upsert_file("data/a.json", b"1", false).await.unwrap();
        assert!(driver.file_exists("data/a.json").await);
        // Directories are not files
        assert!(!driver.file_exists("data").await);
    }

    #[tokio::test]
    async fn test_delete_missing_file_succeeds() {
        let (driver, _tmp) = create_driver();
        driver.delete_file("data/nope.json", true).await.unwrap();
        driver.delete_dir("data/nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_dir() {
        let (driver, _tmp) = create_driver();
        driver.upsert_file("data/d/a.json", b"1", false).await.unwrap();
        driver.upsert_file("data/d/e/b.json", b"2", false).await.unwrap();

        driver.delete_dir("data/d").await.unwrap();

        assert!(!driver.file_exists("data/d/a.json").await);
        assert!(!driver.file_exists("data/d/e/b.json").await);
    }

    #[tokio::test]
    async fn test_move_file() {
        let (driver, _tmp) = create_driver();
        driver.upsert_file("data/a.json", b"1", false).await.unwrap();

        driver.move_file("data/a.json", "data/sub/b.json").await.unwrap();

        assert!(!driver.file_exists("data/a.json").await);
        assert_eq!(driver.read_file("data/sub/b.json").await.unwrap(), b"1");
    }

    #[tokio::test]
    async fn test_move_missing_is_not_found() {
        let (driver, _tmp) = create_driver();
        let err = driver.move_file("data/a.json", "data/b.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_directory_listing() {
        let (driver, _tmp) = create_driver();
        driver.upsert_file("data/g/b.json", b"1", false).await.unwrap();
        driver.upsert_file("data/g/sub/a.json", b"1", false).await.unwrap();
        driver.upsert_file("data/g/.hidden", b"1", false).await.unwrap();

        let files = driver
            .directory_listing("data/g", &ListingOptions::default())
            .await
            .unwrap();
        assert_eq!(files, vec!["b.json", "sub/a.json"]);
    }

    #[tokio::test]
    async fn test_listing_missing_dir_is_not_found() {
        let (driver, _tmp) = create_driver();
        let err = driver
            .directory_listing("data/never", &ListingOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_absolute_paths_bypass_root() {
        let (driver, _tmp) = create_driver();
        let other = TempDir::new().unwrap();
        let absolute = other.path().join("x/y.json");
        fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        fs::write(&absolute, b"abs").unwrap();
        fs::write(other.path().join(".env"), b"dot").unwrap();

        let content = driver
            .read_file(&absolute.to_string_lossy())
            .await
            .unwrap();
        assert_eq!(content, b"abs");

        let files = driver.absolute_directory_listing(other.path()).await.unwrap();
        assert_eq!(files, vec![".env", "x/y.json"]);
    }

    #[tokio::test]
    async fn test_no_revisions() {
        let (driver, _tmp) = create_driver();
        driver.upsert_file("data/a.json", b"1", true).await.unwrap();
        assert!(driver.list_revisions("data").await.unwrap().is_empty());
    }
}
