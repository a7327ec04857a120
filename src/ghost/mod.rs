//! Scoped file service.
//!
//! A [`ScopedFileService`] binds one base directory to one storage driver and
//! exposes a cached, lock-aware file API on top of it:
//!
//! - paths are normalized (and sanitized unless the scope is trusted)
//! - reads go through the shared [`ObjectCache`]
//! - mutations check the owning bot's `locked` flag and the size ceilings,
//!   invalidate both cache keys of the path, and emit a local `changed` event
//! - a base directory ending in `*` is a directory glob that only supports
//!   listing
//!
//! Bulk export/import, pending revisions and database-to-disk mirroring live
//! in the `export` submodule.

mod archive;
mod events;
mod export;
mod paths;

use bytes::Bytes;
use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheValue, ObjectCache, buffer_key, object_key};
use crate::channel::SyncMessage;
use crate::constants::{
    BOT_CONFIG_FILE, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_MODEL_FILE_SIZE, DEFAULT_MODEL_EXTENSION,
    MODELS_DIR,
};
use crate::driver::{
    DatabaseStorageDriver, DiskStorageDriver, FileRevision, ListingOptions, StorageDriver,
};
use crate::error::{Error, Result};
use crate::utils::base_name;

pub use archive::{ArchiveBuilder, TarGzArchiver};
pub use events::ListenerHandle;

use events::ChangeEmitter;
use paths::{glob_listing_base, join, normalize_base, relative_path};

/// Outstanding revisions grouped by top-level folder (`"root"` for files
/// directly under the base directory).
pub type PendingChanges = BTreeMap<String, Vec<FileRevision>>;

/// Size ceilings enforced on upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLimits {
    pub max_file_size: u64,
    /// Ceiling for files ending in `model_extension`.
    pub max_model_file_size: u64,
    pub model_extension: String,
}

impl FileLimits {
    /// Ceiling applying to `path`.
    pub fn limit_for(&self, path: &str) -> u64 {
        if path.ends_with(&self.model_extension) {
            self.max_model_file_size
        } else {
            self.max_file_size
        }
    }
}

impl Default for FileLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_model_file_size: DEFAULT_MAX_MODEL_FILE_SIZE,
            model_extension: DEFAULT_MODEL_EXTENSION.to_string(),
        }
    }
}

/// Per-scope construction options.
#[derive(Debug, Clone, Default)]
pub struct ScopeOptions {
    /// Owning bot; enables the lock check.
    pub bot_id: Option<String>,
    /// Trust caller-supplied paths verbatim (archive import sources).
    pub no_sanitize: bool,
}

/// Options for [`ScopedFileService::upsert_file`] and
/// [`ScopedFileService::upsert_files`].
#[derive(Debug, Clone, Copy)]
pub struct UpsertOptions {
    /// Record a revision (database driver only). Defaults to `true`.
    pub record_revision: bool,
    /// Broadcast a database-to-disk sync request after the write.
    pub sync_db_to_disk: bool,
    pub ignore_lock: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            record_revision: true,
            sync_db_to_disk: false,
            ignore_lock: false,
        }
    }
}

/// Options for [`ScopedFileService::delete_file`].
#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    /// Record a revision (database driver only). Defaults to `true`.
    pub record_revision: bool,
    pub ignore_lock: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            record_revision: true,
            ignore_lock: false,
        }
    }
}

/// One entry of a batch upsert.
#[derive(Debug, Clone)]
pub struct UpsertFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl UpsertFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Textual replacement applied to JSON files of an archive export.
#[derive(Debug, Clone)]
pub struct ReplaceContent {
    /// Every occurrence of each string is replaced.
    pub from: Vec<String>,
    pub to: String,
}

/// Process-wide singletons a scope holds shared references to.
#[derive(Clone)]
pub struct ScopeBackends {
    pub disk: Arc<DiskStorageDriver>,
    pub db: Arc<DatabaseStorageDriver>,
    pub cache: Arc<dyn ObjectCache>,
}

#[derive(Debug, Deserialize)]
struct BotLockState {
    #[serde(default)]
    locked: bool,
}

/// File API bound to one base directory and one driver.
pub struct ScopedFileService {
    base_dir: String,
    is_glob: bool,
    primary: Arc<dyn StorageDriver>,
    disk: Arc<DiskStorageDriver>,
    db: Arc<DatabaseStorageDriver>,
    use_db: bool,
    cache: Arc<dyn ObjectCache>,
    limits: FileLimits,
    options: ScopeOptions,
    archiver: Arc<dyn ArchiveBuilder>,
    events: Arc<ChangeEmitter>,
}

impl std::fmt::Debug for ScopedFileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedFileService")
            .field("base_dir", &self.base_dir)
            .field("driver", &self.primary.name())
            .field("bot_id", &self.options.bot_id)
            .finish_non_exhaustive()
    }
}

impl ScopedFileService {
    /// Creates a scope over `base_dir`.
    ///
    /// The driver choice is fixed for the scope's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScopeIdentifier`] if `*` appears anywhere in
    /// `base_dir` except as its last character.
    pub fn new(
        base_dir: &str,
        backends: ScopeBackends,
        use_db: bool,
        limits: FileLimits,
        options: ScopeOptions,
    ) -> Result<Self> {
        let base_dir = normalize_base(base_dir)?;
        Ok(Self::from_normalized(base_dir, backends, use_db, limits, options))
    }

    /// Builds a scope over a base directory already in canonical form.
    pub(crate) fn from_normalized(
        base_dir: String,
        backends: ScopeBackends,
        use_db: bool,
        limits: FileLimits,
        options: ScopeOptions,
    ) -> Self {
        let is_glob = base_dir.ends_with('*');
        let primary: Arc<dyn StorageDriver> = if use_db {
            backends.db.clone()
        } else {
            backends.disk.clone()
        };

        Self {
            base_dir,
            is_glob,
            primary,
            disk: backends.disk,
            db: backends.db,
            use_db,
            cache: backends.cache,
            limits,
            options,
            archiver: Arc::new(TarGzArchiver::default()),
            events: Arc::new(ChangeEmitter::default()),
        }
    }

    /// Replaces the archive builder used by
    /// [`export_to_archive_buffer`](Self::export_to_archive_buffer).
    #[must_use]
    pub fn with_archiver(mut self, archiver: Arc<dyn ArchiveBuilder>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    /// True for a base directory ending in `*` (listing only).
    pub fn is_directory_glob(&self) -> bool {
        self.is_glob
    }

    pub fn uses_database(&self) -> bool {
        self.use_db
    }

    pub fn bot_id(&self) -> Option<&str> {
        self.options.bot_id.as_deref()
    }

    /// Normalized full path of `folder`/`name` in this scope.
    pub fn resolve_path(&self, folder: &str, name: &str) -> String {
        join(&self.base_dir, &self.relative(&[folder, name]))
    }

    fn relative(&self, parts: &[&str]) -> String {
        relative_path(parts, !self.options.no_sanitize)
    }

    /// Scope-relative path of a file, rejecting names that normalize to
    /// nothing and would otherwise address the folder itself.
    fn file_relative(&self, folder: &str, name: &str) -> Result<String> {
        if self.relative(&[name]).is_empty() {
            return Err(Error::invalid_scope(format!(
                "file name '{name}' is empty after normalization"
            )));
        }
        Ok(self.relative(&[folder, name]))
    }

    /// Full path for a read. An empty file name cannot exist.
    fn read_path(&self, folder: &str, name: &str) -> Result<String> {
        let path = self.resolve_path(folder, name);
        if self.relative(&[name]).is_empty() {
            return Err(Error::not_found(path));
        }
        Ok(path)
    }

    fn listing_base(&self) -> &str {
        if self.is_glob {
            glob_listing_base(&self.base_dir)
        } else {
            &self.base_dir
        }
    }

    fn ensure_discrete(&self, operation: &'static str) -> Result<()> {
        if self.is_glob {
            return Err(Error::unsupported(operation, &self.base_dir));
        }
        Ok(())
    }

    async fn check_lock(&self, relative: &str, ignore_lock: bool) -> Result<()> {
        if ignore_lock {
            return Ok(());
        }
        let Some(bot_id) = &self.options.bot_id else {
            return Ok(());
        };
        if relative == MODELS_DIR || relative.starts_with(&format!("{MODELS_DIR}/")) {
            return Ok(());
        }
        if !self.file_exists("/", BOT_CONFIG_FILE).await {
            return Ok(());
        }

        let state: BotLockState = self.read_file_as_object("/", BOT_CONFIG_FILE).await?;
        if state.locked {
            warn!(bot_id = %bot_id, path = relative, "Rejected write to locked bot");
            return Err(Error::bot_locked(bot_id, relative));
        }
        Ok(())
    }

    fn check_size(&self, path: &str, size: usize) -> Result<()> {
        let limit = self.limits.limit_for(path);
        let size = size as u64;
        if size > limit {
            return Err(Error::file_too_large(path, size, limit));
        }
        Ok(())
    }

    async fn invalidate_path(&self, path: &str) {
        self.cache.invalidate(&buffer_key(path)).await;
        self.cache.invalidate(&object_key(path)).await;
    }

    /// Creates or overwrites `folder`/`name`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The scope is a directory glob
    /// - `name` is empty once normalized
    /// - The bot is locked and `ignore_lock` is not set
    /// - The content exceeds the size ceiling
    /// - The driver write or the sync broadcast fails
    pub async fn upsert_file(
        &self,
        folder: &str,
        name: &str,
        content: &[u8],
        options: UpsertOptions,
    ) -> Result<()> {
        self.ensure_discrete("write")?;
        let relative = self.file_relative(folder, name)?;
        self.check_lock(&relative, options.ignore_lock).await?;
        self.write_unchecked(&join(&self.base_dir, &relative), content, options.record_revision)
            .await?;

        if options.sync_db_to_disk {
            self.request_sync(folder).await?;
        }
        Ok(())
    }

    /// Upserts every file of `files` under `folder` concurrently.
    ///
    /// The lock is checked once for the batch. Every write runs to completion
    /// and there is no rollback: when one write fails, the others stay in
    /// place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScopeIdentifier`] before any write if a name is
    /// empty once normalized. Otherwise returns the first error hit by any
    /// write; see [`upsert_file`](Self::upsert_file).
    pub async fn upsert_files(
        &self,
        folder: &str,
        files: Vec<UpsertFile>,
        options: UpsertOptions,
    ) -> Result<()> {
        self.ensure_discrete("write")?;
        let paths = files
            .iter()
            .map(|file| -> Result<String> {
                Ok(join(&self.base_dir, &self.file_relative(folder, &file.name)?))
            })
            .collect::<Result<Vec<_>>>()?;
        self.check_lock(&self.relative(&[folder]), options.ignore_lock)
            .await?;

        let writes = files.iter().zip(paths).map(|(file, path)| {
            async move {
                self.write_unchecked(&path, &file.content, options.record_revision)
                    .await
            }
        });
        futures::future::join_all(writes)
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()?;

        if options.sync_db_to_disk {
            self.request_sync(folder).await?;
        }
        Ok(())
    }

    /// Size-checked write of a normalized path, skipping the lock check.
    async fn write_unchecked(&self, path: &str, content: &[u8], record_revision: bool) -> Result<()> {
        self.check_size(path, content.len())?;
        debug!(path, size = content.len(), driver = self.primary.name(), "Upserting file");
        self.primary
            .upsert_file(path, content, record_revision)
            .await?;
        self.invalidate_path(path).await;
        self.events.emit(path);
        Ok(())
    }

    async fn request_sync(&self, folder: &str) -> Result<()> {
        self.cache
            .sync(&SyncMessage {
                root_folder: folder.to_string(),
                bot_id: self.options.bot_id.clone(),
            })
            .await
    }

    /// Reads `folder`/`name`, from the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the file does not exist,
    /// [`Error::UnsupportedOperation`] on a directory-glob scope, or a driver
    /// error.
    pub async fn read_file_as_buffer(&self, folder: &str, name: &str) -> Result<Bytes> {
        self.ensure_discrete("read")?;
        self.read_buffer(&self.read_path(folder, name)?).await
    }

    /// Read-through fill of the buffer cache.
    ///
    /// The fill is not ordered against writers: an upsert landing between the
    /// driver read and `cache.set` leaves the older bytes cached until the
    /// path is invalidated again.
    async fn read_buffer(&self, path: &str) -> Result<Bytes> {
        let key = buffer_key(path);
        if let Ok(CacheValue::Buffer(content)) = self.cache.get(&key).await {
            debug!(path, "Buffer cache hit");
            return Ok(content);
        }

        debug!(path, driver = self.primary.name(), "Buffer cache miss");
        let content = Bytes::from(self.primary.read_file(path).await?);
        self.cache.set(&key, CacheValue::Buffer(content.clone())).await;
        Ok(content)
    }

    /// Reads `folder`/`name` as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Same as [`read_file_as_buffer`](Self::read_file_as_buffer), plus
    /// [`Error::ParseError`] for invalid UTF-8.
    pub async fn read_file_as_string(&self, folder: &str, name: &str) -> Result<String> {
        self.ensure_discrete("read")?;
        let path = self.read_path(folder, name)?;
        let content = self.read_buffer(&path).await?;
        String::from_utf8(content.to_vec()).map_err(|e| Error::parse(&path, e.to_string()))
    }

    /// Reads and parses `folder`/`name` as JSON.
    ///
    /// The parsed document is cached separately from the raw buffer.
    ///
    /// # Errors
    ///
    /// Same as [`read_file_as_buffer`](Self::read_file_as_buffer), plus
    /// [`Error::ParseError`] naming the file when the content is not valid
    /// JSON or does not match `T`.
    pub async fn read_file_as_object<T: DeserializeOwned>(
        &self,
        folder: &str,
        name: &str,
    ) -> Result<T> {
        self.ensure_discrete("read")?;
        let path = self.read_path(folder, name)?;
        let key = object_key(&path);

        let value = match self.cache.get(&key).await {
            Ok(CacheValue::Object(value)) => {
                debug!(path = %path, "Object cache hit");
                value
            }
            _ => {
                let content = self.read_buffer(&path).await?;
                let value = Arc::new(parse_json(&path, &content)?);
                self.cache.set(&key, CacheValue::Object(value.clone())).await;
                value
            }
        };

        T::deserialize(value.as_ref()).map_err(|e| Error::parse(&path, e.to_string()))
    }

    /// Returns true if `folder`/`name` exists. Never fails.
    ///
    /// A cached entry counts as proof of existence. Always false on a
    /// directory-glob scope.
    pub async fn file_exists(&self, folder: &str, name: &str) -> bool {
        if self.is_glob {
            return false;
        }
        let Ok(path) = self.read_path(folder, name) else {
            return false;
        };
        if self.cache.has(&buffer_key(&path)).await || self.cache.has(&object_key(&path)).await {
            return true;
        }
        self.primary.file_exists(&path).await
    }

    /// Deletes `folder`/`name`. Deleting a missing file succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope is a directory glob, the bot is locked,
    /// or the driver delete fails.
    pub async fn delete_file(&self, folder: &str, name: &str, options: DeleteOptions) -> Result<()> {
        self.ensure_discrete("delete")?;
        let relative = self.file_relative(folder, name)?;
        self.check_lock(&relative, options.ignore_lock).await?;

        let path = join(&self.base_dir, &relative);
        debug!(path = %path, driver = self.primary.name(), "Deleting file");
        self.primary
            .delete_file(&path, options.record_revision)
            .await?;
        self.invalidate_path(&path).await;
        self.events.emit(&path);
        Ok(())
    }

    /// Recursively deletes `folder`.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope is a directory glob, the bot is locked,
    /// or the driver delete fails.
    pub async fn delete_folder(&self, folder: &str, ignore_lock: bool) -> Result<()> {
        self.ensure_discrete("delete")?;
        let relative = self.relative(&[folder]);
        self.check_lock(&relative, ignore_lock).await?;

        let path = join(&self.base_dir, &relative);
        debug!(path = %path, driver = self.primary.name(), "Deleting folder");
        self.primary.delete_dir(&path).await?;

        let prefix = if path.is_empty() {
            path.clone()
        } else {
            format!("{path}/")
        };
        self.cache.invalidate_starting_with(&prefix).await;
        self.events.emit(&path);
        Ok(())
    }

    /// Renames `folder`/`old_name` to `folder`/`new_name`.
    ///
    /// Only the source path's cache entries are invalidated; a cached entry
    /// for the destination path survives the rename.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the source does not exist, or an error
    /// if the scope is a directory glob, the bot is locked, or the driver
    /// rename fails.
    pub async fn rename_file(
        &self,
        folder: &str,
        old_name: &str,
        new_name: &str,
        ignore_lock: bool,
    ) -> Result<()> {
        self.ensure_discrete("rename")?;
        let relative = self.file_relative(folder, old_name)?;
        let to = join(&self.base_dir, &self.file_relative(folder, new_name)?);
        self.check_lock(&relative, ignore_lock).await?;

        let from = join(&self.base_dir, &relative);
        debug!(from = %from, to = %to, driver = self.primary.name(), "Renaming file");
        self.primary.move_file(&from, &to).await?;
        self.invalidate_path(&from).await;
        self.events.emit(&from);
        Ok(())
    }

    /// Lists files under `folder` whose base name matches `pattern`
    /// (case-insensitive glob). A missing folder yields an empty list.
    ///
    /// Paths are relative to `folder`.
    ///
    /// # Errors
    ///
    /// Returns a driver error if listing fails for any reason other than a
    /// missing directory, or if `pattern` or an exclude is not a valid glob.
    pub async fn directory_listing(
        &self,
        folder: &str,
        pattern: &str,
        excludes: &[String],
        include_dot_files: bool,
    ) -> Result<Vec<String>> {
        let dir = join(self.listing_base(), &self.relative(&[folder]));
        let options = ListingOptions::new(excludes, include_dot_files);

        let files = match self.primary.directory_listing(&dir, &options).await {
            Ok(files) => files,
            Err(e) if e.is_not_found() => {
                debug!(dir = %dir, "Listing missing directory");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let matcher = Pattern::new(pattern)
            .map_err(|e| Error::driver(format!("Invalid listing pattern '{pattern}'"), e))?;
        let match_options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };

        Ok(files
            .into_iter()
            .filter(|file| matcher.matches_with(base_name(file), match_options))
            .collect())
    }

    /// Registers `listener` for local `changed` events; it receives the
    /// normalized path of every mutated file or folder.
    pub fn on_file_changed(
        &self,
        listener: impl Fn(&str) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.events.subscribe(listener)
    }
}

/// Parses JSON, retrying leniently to report a more useful diagnostic.
fn parse_json(path: &str, content: &[u8]) -> Result<Value> {
    match serde_json::from_slice(content) {
        Ok(value) => Ok(value),
        Err(_) => lenient_parse(content).map_err(|diagnostic| Error::parse(path, diagnostic)),
    }
}

/// Accepts a leading UTF-8 BOM; otherwise locates the first problem.
fn lenient_parse(content: &[u8]) -> std::result::Result<Value, String> {
    let trimmed = content.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(content);
    if let Ok(value) = serde_json::from_slice(trimmed) {
        return Ok(value);
    }

    let mut stream = serde_json::Deserializer::from_slice(trimmed).into_iter::<Value>();
    match stream.next() {
        Some(Ok(_)) => Err(format!(
            "unexpected trailing content at byte {}",
            stream.byte_offset()
        )),
        Some(Err(e)) => Err(format!(
            "syntax error at line {}, column {}: {e}",
            e.line(),
            e.column()
        )),
        None => Err("document is empty".to_string()),
    }
}
