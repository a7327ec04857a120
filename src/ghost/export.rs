//! Bulk export and import, pending revisions, and database-to-disk mirroring.

use std::path::Path;
use tracing::{debug, info};

use super::paths::join;
use super::{PendingChanges, ReplaceContent, ScopedFileService, UpsertFile, UpsertOptions};
use crate::channel::SyncMessage;
use crate::constants::REVISIONS_MANIFEST;
use crate::driver::{ListingOptions, StorageDriver};
use crate::error::{Error, Result};
use crate::utils::strip_dir;

/// Bucket of revisions for files directly under the base directory.
const ROOT_BUCKET: &str = "root";

const ARCHIVE_NAME: &str = "archive.tgz";

async fn write_export_file(target: &Path, relative: &str, content: &[u8]) -> Result<()> {
    let path = target.join(relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            Error::driver(format!("Failed to create export directory: {}", parent.display()), e)
        })?;
    }
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| Error::driver(format!("Failed to write export file: {}", path.display()), e))
}

async fn apply_replacements(dir: &Path, files: &[String], replace: &ReplaceContent) -> Result<()> {
    for file in files.iter().filter(|f| f.ends_with(".json")) {
        let path = dir.join(file);
        let original = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::driver(format!("Failed to read staged file: {file}"), e))?;

        let replaced = replace
            .from
            .iter()
            .filter(|from| !from.is_empty())
            .fold(original.clone(), |content, from| {
                content.replace(from.as_str(), &replace.to)
            });

        if replaced != original {
            tokio::fs::write(&path, replaced)
                .await
                .map_err(|e| Error::driver(format!("Failed to rewrite staged file: {file}"), e))?;
        }
    }
    Ok(())
}

impl ScopedFileService {
    /// Copies every file of the scope into `target`, preserving relative
    /// paths, plus a `revisions.json` manifest of the database's outstanding
    /// revisions for this base directory.
    ///
    /// Files are read from the driver directly, never from the cache. Only
    /// names matching `*.*` are exported.
    ///
    /// Returns the relative paths written, `revisions.json` last.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope is a directory glob, or if listing,
    /// reading, or writing any file fails.
    pub async fn export_to_directory(
        &self,
        target: &Path,
        excludes: &[String],
    ) -> Result<Vec<String>> {
        self.ensure_discrete("export")?;

        let mut files: Vec<String> = self
            .directory_listing("./", "*.*", excludes, true)
            .await?
            .into_iter()
            .filter(|file| file != REVISIONS_MANIFEST)
            .collect();

        for file in &files {
            let content = self
                .primary
                .read_file(&join(&self.base_dir, file))
                .await?;
            write_export_file(target, file, &content).await?;
        }

        let revisions = self.db.list_revisions(&self.base_dir).await?;
        let manifest = serde_json::to_vec_pretty(&revisions)
            .map_err(|e| Error::driver("Failed to encode revisions manifest", e))?;
        write_export_file(target, REVISIONS_MANIFEST, &manifest).await?;
        files.push(REVISIONS_MANIFEST.to_string());

        info!(
            base_dir = %self.base_dir,
            target = %target.display(),
            files = files.len(),
            revisions = revisions.len(),
            "Exported scope"
        );
        Ok(files)
    }

    /// Exports the scope into a compressed archive and returns its bytes.
    ///
    /// When `replace` is given, its strings are replaced textually in every
    /// exported `.json` file before archiving. The staging directory is
    /// removed on every exit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the export, the replacement, or the archive step
    /// fails.
    pub async fn export_to_archive_buffer(
        &self,
        excludes: &[String],
        replace: Option<&ReplaceContent>,
    ) -> Result<Vec<u8>> {
        let staging = tempfile::TempDir::new()
            .map_err(|e| Error::driver("Failed to create staging directory", e))?;
        let export_dir = staging.path().join("export");

        let files = self.export_to_directory(&export_dir, excludes).await?;
        if let Some(replace) = replace {
            apply_replacements(&export_dir, &files, replace).await?;
        }

        let output = staging.path().join(ARCHIVE_NAME);
        let archiver = self.archiver.clone();
        let (source, destination) = (export_dir.clone(), output.clone());
        tokio::task::spawn_blocking(move || archiver.build(&destination, &source, &files)).await??;

        let bytes = tokio::fs::read(&output)
            .await
            .map_err(|e| Error::driver("Failed to read archive", e))?;
        debug!(base_dir = %self.base_dir, size = bytes.len(), "Archive built");
        Ok(bytes)
    }

    /// Upserts every file found under the absolute directory `source`.
    ///
    /// Lock checks are skipped; imports are administrator-trusted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `source` does not exist, or any error
    /// from reading a source file or writing it into the scope.
    pub async fn import_from_directory(&self, source: &Path) -> Result<()> {
        let names = self.disk.absolute_directory_listing(source).await?;

        let mut files = Vec::with_capacity(names.len());
        for name in names {
            let content = self
                .disk
                .read_file(&source.join(&name).to_string_lossy())
                .await?;
            files.push(UpsertFile::new(name, content));
        }

        let count = files.len();
        self.upsert_files(
            "/",
            files,
            UpsertOptions {
                ignore_lock: true,
                ..UpsertOptions::default()
            },
        )
        .await?;

        info!(base_dir = %self.base_dir, source = %source.display(), files = count, "Imported directory");
        Ok(())
    }

    /// Outstanding database revisions of this scope, grouped by top-level
    /// folder. Always empty for a disk-backed scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the revision log cannot be read.
    pub async fn get_pending_changes(&self) -> Result<PendingChanges> {
        let mut pending = PendingChanges::new();
        if !self.use_db {
            return Ok(pending);
        }

        for revision in self.db.list_revisions(&self.base_dir).await? {
            let relative = strip_dir(&revision.path, &self.base_dir).unwrap_or(&revision.path);
            let bucket = match relative.split_once('/') {
                Some((folder, _)) => folder.to_string(),
                None => ROOT_BUCKET.to_string(),
            };
            pending.entry(bucket).or_default().push(revision);
        }
        Ok(pending)
    }

    /// True when the scope has no pending revisions.
    ///
    /// # Errors
    ///
    /// Returns an error if the revision log cannot be read.
    pub async fn is_fully_synced(&self) -> Result<bool> {
        Ok(self.get_pending_changes().await?.is_empty())
    }

    /// Promotes the files of the absolute directory `source` into the scope.
    ///
    /// The whole of `source` is read and size-checked first. Only then is
    /// every pending revision of the scope consumed and its path
    /// invalidated, and each source file written through the primary driver
    /// without recording a revision. Database-backed scopes broadcast a sync
    /// request afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope is a directory glob, `source` cannot be
    /// listed or read, a file exceeds its size ceiling, a revision cannot be
    /// removed, or a write fails. The revision log is untouched when `source`
    /// is unreadable or oversized.
    pub async fn force_update(&self, source: &Path) -> Result<()> {
        self.ensure_discrete("update")?;

        let names = self.disk.absolute_directory_listing(source).await?;
        let mut staged = Vec::with_capacity(names.len());
        for name in &names {
            let content = self
                .disk
                .read_file(&source.join(name).to_string_lossy())
                .await?;
            let path = join(&self.base_dir, &self.relative(&[name]));
            self.check_size(&path, content.len())?;
            staged.push((path, content));
        }

        let revisions = self.db.list_revisions(&self.base_dir).await?;
        for revision in &revisions {
            self.db
                .delete_revision(&revision.path, &revision.revision)
                .await?;
            self.invalidate_path(&revision.path).await;
        }

        for (path, content) in &staged {
            self.write_unchecked(path, content, false).await?;
        }

        if self.use_db {
            self.cache
                .sync(&SyncMessage {
                    root_folder: "/".to_string(),
                    bot_id: self.options.bot_id.clone(),
                })
                .await?;
        }

        info!(
            base_dir = %self.base_dir,
            consumed = revisions.len(),
            files = names.len(),
            "Scope force-updated"
        );
        Ok(())
    }

    /// Mirrors the database files under `folder` onto disk.
    ///
    /// No-op unless the scope is database-backed.
    ///
    /// # Errors
    ///
    /// Returns an error if a database read or a disk write fails.
    pub async fn sync_database_files_to_disk(&self, folder: &str) -> Result<()> {
        if !self.use_db {
            return Ok(());
        }

        let dir = join(self.listing_base(), &self.relative(&[folder]));
        let files = self
            .db
            .directory_listing(&dir, &ListingOptions::new(&[], true))
            .await?;

        for file in &files {
            let path = join(&dir, file);
            let content = self.db.read_file(&path).await?;
            self.disk.upsert_file(&path, &content, false).await?;
        }

        info!(dir = %dir, files = files.len(), "Synced database files to disk");
        Ok(())
    }
}
