//! Process-wide scope registry.
//!
//! [`GhostService`] owns the long-lived [`ScopedFileService`] instances and
//! relays cross-process sync requests to them. Drivers and the cache are
//! injected at construction; [`GhostService::open`] wires the default stack
//! from a [`GhostConfig`].

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{MemoryObjectCache, ObjectCache};
use crate::channel::{Envelope, LocalSyncChannel, SyncChannel, SyncMessage};
use crate::config::GhostConfig;
use crate::constants::{
    BOTS_DIR, BOTS_GLOB_DIR, BOTS_SCOPE_KEY, GLOBAL_DIR, GLOBAL_SCOPE_KEY, MAX_BOT_ID_LEN, ROOT_DIR,
};
use crate::driver::{DatabaseStorageDriver, DiskStorageDriver};
use crate::error::{Error, Result};
use crate::ghost::{FileLimits, ScopeBackends, ScopeOptions, ScopedFileService};

/// Checks a bot identifier: ASCII alphanumeric first, then alphanumerics,
/// `_` or `-`, at most [`MAX_BOT_ID_LEN`] characters.
///
/// # Errors
///
/// Returns [`Error::InvalidScopeIdentifier`] for any other identifier.
pub fn validate_bot_id(bot_id: &str) -> Result<()> {
    let mut chars = bot_id.chars();
    let valid = bot_id.len() <= MAX_BOT_ID_LEN
        && chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(Error::invalid_scope(format!("invalid bot id '{bot_id}'")))
    }
}

/// Factory and memo table for scoped file services.
///
/// `global()`, `bots()` and `for_bot()` return memoized instances; `root()`
/// and `custom()` build a fresh scope on every call.
///
/// # Example
///
/// ```ignore
/// let ghost = GhostService::open(&config)?;
/// ghost.initialize(config.use_db_driver, false);
/// let flows = ghost.for_bot("welcome-bot")?.directory_listing("flows", "*.json", &[], false).await?;
/// ```
pub struct GhostService {
    backends: ScopeBackends,
    limits: FileLimits,
    use_db: AtomicBool,
    scopes: RwLock<HashMap<String, Arc<ScopedFileService>>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    remote_task: Mutex<Option<JoinHandle<()>>>,
}

impl GhostService {
    /// Creates a registry over injected drivers and cache.
    pub fn new(backends: ScopeBackends, limits: FileLimits, use_db: bool) -> Self {
        Self {
            backends,
            limits,
            use_db: AtomicBool::new(use_db),
            scopes: RwLock::new(HashMap::new()),
            sync_task: Mutex::new(None),
            remote_task: Mutex::new(None),
        }
    }

    /// Wires the default stack: a disk driver at `project_dir`, SQLite at
    /// the resolved database path, an in-process channel and a memory cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(config: &GhostConfig) -> Result<Arc<Self>> {
        Self::open_with_channel(config, Arc::new(LocalSyncChannel::new()))
    }

    /// Like [`open`](Self::open), publishing on a caller-supplied channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_with_channel(
        config: &GhostConfig,
        channel: Arc<dyn SyncChannel>,
    ) -> Result<Arc<Self>> {
        let db_path = config.resolved_database_path();
        let backends = ScopeBackends {
            disk: Arc::new(DiskStorageDriver::new(&config.project_dir)),
            db: Arc::new(DatabaseStorageDriver::open(&db_path)?),
            cache: Arc::new(MemoryObjectCache::new(channel, config.cache_max_entries)),
        };

        info!(
            project_dir = %config.project_dir.display(),
            database = %db_path.display(),
            use_db = config.use_db_driver,
            "Ghost service opened"
        );
        Ok(Arc::new(Self::new(
            backends,
            config.file_limits(),
            config.use_db_driver,
        )))
    }

    /// Sets the default driver and drops every memoized scope so the next
    /// access rebuilds it against the new driver.
    ///
    /// Unless `ignore_sync` is set, also starts the background listeners for
    /// sync requests and remote cache invalidations.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while `ignore_sync` is false.
    pub fn initialize(self: &Arc<Self>, use_db: bool, ignore_sync: bool) {
        self.use_db.store(use_db, Ordering::SeqCst);
        self.scopes.write().clear();

        if let Some(previous) = self.sync_task.lock().take() {
            previous.abort();
        }

        if !ignore_sync {
            *self.sync_task.lock() = Some(self.spawn_sync_listener());

            let mut remote = self.remote_task.lock();
            if remote.is_none() {
                *remote = Some(self.backends.cache.clone().listen_remote());
            }
        }

        info!(use_db, ignore_sync, "Ghost service initialized");
    }

    /// Stops the background listeners. Also performed on drop.
    pub fn shutdown(&self) {
        for task in [&self.sync_task, &self.remote_task] {
            if let Some(handle) = task.lock().take() {
                handle.abort();
            }
        }
        debug!("Ghost service listeners stopped");
    }

    /// Current default driver choice.
    pub fn uses_database(&self) -> bool {
        self.use_db.load(Ordering::SeqCst)
    }

    /// Shared cache of every scope.
    pub fn cache(&self) -> &Arc<dyn ObjectCache> {
        &self.backends.cache
    }

    /// Global configuration scope (`data/global`).
    pub fn global(&self) -> Arc<ScopedFileService> {
        self.memoized(GLOBAL_SCOPE_KEY, || {
            self.build(GLOBAL_DIR.to_string(), self.uses_database(), ScopeOptions::default())
        })
    }

    /// Listing-only scope over every bot folder (`data/bots/*`).
    pub fn bots(&self) -> Arc<ScopedFileService> {
        self.memoized(BOTS_SCOPE_KEY, || {
            self.build(
                BOTS_GLOB_DIR.to_string(),
                self.uses_database(),
                ScopeOptions::default(),
            )
        })
    }

    /// Scope of one bot (`data/bots/<bot_id>`), lock-checked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScopeIdentifier`] if `bot_id` is malformed.
    pub fn for_bot(&self, bot_id: &str) -> Result<Arc<ScopedFileService>> {
        validate_bot_id(bot_id)?;
        Ok(self.memoized(bot_id, || {
            self.build(
                format!("{BOTS_DIR}/{bot_id}"),
                self.uses_database(),
                ScopeOptions {
                    bot_id: Some(bot_id.to_string()),
                    no_sanitize: false,
                },
            )
        }))
    }

    /// Whole data tree (`data`), not memoized.
    ///
    /// `use_db_override` replaces the default driver choice for this scope.
    pub fn root(&self, use_db_override: Option<bool>) -> Arc<ScopedFileService> {
        let use_db = use_db_override.unwrap_or_else(|| self.uses_database());
        Arc::new(self.build(ROOT_DIR.to_string(), use_db, ScopeOptions::default()))
    }

    /// Scope over a caller-supplied base directory, not memoized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScopeIdentifier`] if `base_dir` has a wildcard
    /// anywhere but at its end.
    pub fn custom(&self, base_dir: &str) -> Result<Arc<ScopedFileService>> {
        self.custom_with(base_dir, false)
    }

    /// Like [`custom`](Self::custom), trusting paths verbatim.
    ///
    /// # Errors
    ///
    /// Same as [`custom`](Self::custom).
    pub fn custom_unsanitized(&self, base_dir: &str) -> Result<Arc<ScopedFileService>> {
        self.custom_with(base_dir, true)
    }

    fn custom_with(&self, base_dir: &str, no_sanitize: bool) -> Result<Arc<ScopedFileService>> {
        let scope = ScopedFileService::new(
            base_dir,
            self.backends.clone(),
            self.uses_database(),
            self.limits.clone(),
            ScopeOptions {
                bot_id: None,
                no_sanitize,
            },
        )?;
        Ok(Arc::new(scope))
    }

    fn build(&self, base_dir: String, use_db: bool, options: ScopeOptions) -> ScopedFileService {
        ScopedFileService::from_normalized(
            base_dir,
            self.backends.clone(),
            use_db,
            self.limits.clone(),
            options,
        )
    }

    fn memoized(
        &self,
        key: &str,
        build: impl FnOnce() -> ScopedFileService,
    ) -> Arc<ScopedFileService> {
        if let Some(scope) = self.scopes.read().get(key) {
            return scope.clone();
        }

        let mut scopes = self.scopes.write();
        scopes
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(scope = key, "Creating scope");
                Arc::new(build())
            })
            .clone()
    }

    fn spawn_sync_listener(self: &Arc<Self>) -> JoinHandle<()> {
        // Subscribe before spawning so requests published right after
        // initialization are delivered
        let mut rx = self.backends.cache.subscribe_sync();
        let registry: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        registry.handle_sync(&envelope).await;
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sync listener lagged, some requests were dropped");
                    },
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Applies one sync request. Failures are logged, never propagated.
    async fn handle_sync(&self, envelope: &Envelope) {
        let message: SyncMessage = match serde_json::from_slice(&envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(id = %envelope.id, error = %e, "Ignoring malformed sync request");
                return;
            },
        };

        let scope = match message.bot_id.as_deref() {
            Some(bot_id) => self.for_bot(bot_id),
            None => Ok(self.global()),
        };
        let result = match scope {
            Ok(scope) => scope.sync_database_files_to_disk(&message.root_folder).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            error!(
                id = %envelope.id,
                bot_id = ?message.bot_id,
                root_folder = %message.root_folder,
                error = %e,
                "Failed to sync database files to disk"
            );
        }
    }
}

impl Drop for GhostService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
