//! Shared constants: scope locations, default limits, cache keys and topics.

// =============================================================================
// Scope base directories
// =============================================================================

/// Base directory of the whole data tree (the `root` scope).
pub const ROOT_DIR: &str = "data";

/// Base directory of the global scope.
pub const GLOBAL_DIR: &str = "data/global";

/// Directory holding one sub-folder per bot.
pub const BOTS_DIR: &str = "data/bots";

/// Directory-glob base of the bots-root scope (listing only).
pub const BOTS_GLOB_DIR: &str = "data/bots/*";

/// Memo key of the global scope.
pub const GLOBAL_SCOPE_KEY: &str = "__global__";

/// Memo key of the bots-root scope.
pub const BOTS_SCOPE_KEY: &str = "__bots__";

/// Per-bot configuration file holding the `locked` flag.
pub const BOT_CONFIG_FILE: &str = "bot.config.json";

/// Sub-folder of a bot scope exempt from the lock check.
pub const MODELS_DIR: &str = "models";

/// Revisions manifest written next to exported files.
pub const REVISIONS_MANIFEST: &str = "revisions.json";

/// Maximum accepted bot identifier length.
pub const MAX_BOT_ID_LEN: usize = 50;

// =============================================================================
// Size limits
// =============================================================================

/// Default ceiling for regular files (20 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Default ceiling for model files (500 MiB).
pub const DEFAULT_MAX_MODEL_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Extension identifying model artifacts.
pub const DEFAULT_MODEL_EXTENSION: &str = ".model";

// =============================================================================
// Storage
// =============================================================================

/// Default SQLite location, relative to the project directory.
pub const DEFAULT_DATABASE_PATH: &str = "data/storage.sqlite";

/// Author recorded on revisions created by this process.
pub const REVISION_AUTHOR: &str = "server";

// =============================================================================
// Cache and sync
// =============================================================================

/// Cache key prefix of parsed objects.
pub const OBJECT_KEY_PREFIX: &str = "object::";

/// Cache key prefix of raw buffers.
pub const BUFFER_KEY_PREFIX: &str = "buffer::";

/// Topic carrying database-to-disk sync requests.
pub const SYNC_TOPIC: &str = "ghost.sync_db_files_to_disk";

/// Topic carrying cross-process cache invalidations.
pub const INVALIDATION_TOPIC: &str = "cache.invalidation";

/// Buffered messages per topic before slow receivers start lagging.
pub const CHANNEL_CAPACITY: usize = 1024;
