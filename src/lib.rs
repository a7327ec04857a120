//! Scoped virtual filesystem with pluggable storage drivers.
//!
//! `ghostfs` binds logical namespaces ("scopes") such as the global config
//! folder, a single bot's data folder, or a caller-supplied root to one of two
//! storage drivers:
//!
//! - [`DiskStorageDriver`] - plain files under a project directory
//! - [`DatabaseStorageDriver`] - SQLite rows plus a revision log
//!
//! Every scope reads through a shared [`ObjectCache`] that is invalidated on
//! writes, and relays cache invalidations and database-to-disk sync requests
//! across processes through a [`SyncChannel`].
//!
//! # Example
//!
//! ```no_run
//! use ghostfs::{GhostConfig, GhostService, UpsertOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let ghost = GhostService::open(&GhostConfig::default())?;
//! ghost.initialize(false, false);
//!
//! let bot = ghost.for_bot("welcome-bot")?;
//! bot.upsert_file("/", "flow.json", br#"{"a":1}"#, UpsertOptions::default())
//!     .await?;
//! let flow: serde_json::Value = bot.read_file_as_object("/", "flow.json").await?;
//! assert_eq!(flow["a"], 1);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod ghost;
pub mod registry;
pub mod utils;

pub use cache::{CacheValue, MemoryObjectCache, ObjectCache};
pub use channel::{Envelope, LocalSyncChannel, SyncChannel, SyncMessage};
pub use config::GhostConfig;
pub use driver::{
    DatabaseStorageDriver, DiskStorageDriver, FileRevision, ListingOptions, StorageDriver,
};
pub use error::{Error, Result};
pub use ghost::{
    ArchiveBuilder, DeleteOptions, FileLimits, ListenerHandle, PendingChanges, ReplaceContent,
    ScopeBackends, ScopeOptions, ScopedFileService, TarGzArchiver, UpsertFile, UpsertOptions,
};
pub use registry::GhostService;
