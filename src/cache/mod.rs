//! Read-through object cache shared by every scope of a process.
//!
//! Entries are keyed by `"buffer::" + path` (raw bytes) or `"object::" + path`
//! (parsed JSON). The two keys of a path are independent: invalidating one
//! leaves the other in place, so writers must invalidate both. There is no
//! TTL; entries live until a write, delete, rename or remote invalidation
//! removes them.
//!
//! # Example
//!
//! ```ignore
//! use ghostfs::cache::{buffer_key, CacheValue, MemoryObjectCache, ObjectCache};
//!
//! let cache = MemoryObjectCache::new(channel, None);
//! cache.set(&buffer_key("data/global/a.json"), CacheValue::buffer(b"{}".to_vec())).await;
//! assert!(cache.has(&buffer_key("data/global/a.json")).await);
//! ```

mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::channel::{Envelope, SyncMessage};
use crate::constants::{BUFFER_KEY_PREFIX, OBJECT_KEY_PREFIX};
use crate::error::Result;

pub use memory::MemoryObjectCache;

/// Cached value: raw file content or its parsed form.
#[derive(Debug, Clone)]
pub enum CacheValue {
    Buffer(Bytes),
    Object(Arc<serde_json::Value>),
}

impl CacheValue {
    pub fn buffer(data: impl Into<Bytes>) -> Self {
        Self::Buffer(data.into())
    }

    pub fn object(value: serde_json::Value) -> Self {
        Self::Object(Arc::new(value))
    }
}

/// Cache key of a path's raw buffer.
pub fn buffer_key(path: &str) -> String {
    format!("{BUFFER_KEY_PREFIX}{path}")
}

/// Cache key of a path's parsed object.
pub fn object_key(path: &str) -> String {
    format!("{OBJECT_KEY_PREFIX}{path}")
}

/// Path part of a cache key, if the key has a known prefix.
pub fn key_path(key: &str) -> Option<&str> {
    key.strip_prefix(BUFFER_KEY_PREFIX)
        .or_else(|| key.strip_prefix(OBJECT_KEY_PREFIX))
}

/// Invalidation-aware cache contract.
///
/// Implementations must be thread-safe; every scope of a process shares one
/// instance.
#[async_trait]
pub trait ObjectCache: Send + Sync + 'static {
    /// Returns true if `key` is cached.
    async fn has(&self, key: &str) -> bool;

    /// Returns the cached value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`](crate::Error::NotFound) on a miss.
    async fn get(&self, key: &str) -> Result<CacheValue>;

    /// Stores `value` under `key`.
    async fn set(&self, key: &str, value: CacheValue);

    /// Removes `key` locally and asks remote processes to do the same.
    async fn invalidate(&self, key: &str);

    /// Removes every key whose path starts with `prefix`, locally and remotely.
    async fn invalidate_starting_with(&self, prefix: &str);

    /// Publishes a database-to-disk sync request to every process.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded or published.
    async fn sync(&self, message: &SyncMessage) -> Result<()>;

    /// Local `invalidation` events, one per removed key.
    fn subscribe_invalidations(&self) -> broadcast::Receiver<String>;

    /// Raw sync requests published by any process (including this one).
    fn subscribe_sync(&self) -> broadcast::Receiver<Envelope>;

    /// Starts applying invalidations published by other processes.
    fn listen_remote(self: Arc<Self>) -> JoinHandle<()>;
}
