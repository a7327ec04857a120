//! In-memory object cache backed by moka.

use async_trait::async_trait;
use moka::sync::Cache as MokaCache;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CacheValue, ObjectCache, key_path};
use crate::channel::{Envelope, SyncChannel, SyncMessage};
use crate::constants::{CHANNEL_CAPACITY, INVALIDATION_TOPIC, SYNC_TOPIC};
use crate::error::{Error, Result};

/// Invalidation broadcast to other processes.
#[derive(Debug, Serialize, Deserialize)]
struct RemoteInvalidation {
    origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
}

/// Process-local cache with cross-process invalidation.
///
/// # Thread Safety
///
/// moka is thread-safe internally, no external locking needed.
pub struct MemoryObjectCache {
    /// Identifies this cache in remote invalidations so it skips its own.
    id: String,
    entries: MokaCache<String, CacheValue>,
    invalidations: broadcast::Sender<String>,
    channel: Arc<dyn SyncChannel>,
}

impl MemoryObjectCache {
    /// Creates a cache publishing on `channel`.
    ///
    /// `max_entries` bounds the entry count; `None` keeps everything until
    /// invalidated.
    pub fn new(channel: Arc<dyn SyncChannel>, max_entries: Option<u64>) -> Self {
        let mut builder = MokaCache::builder();
        if let Some(max) = max_entries {
            builder = builder.max_capacity(max);
        }

        Self {
            id: Uuid::new_v4().to_string(),
            entries: builder.build(),
            invalidations: broadcast::channel(CHANNEL_CAPACITY).0,
            channel,
        }
    }

    /// Number of cached entries (approximate, moka applies writes lazily).
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    fn invalidate_local(&self, key: &str) {
        let key = key.to_string();
        self.entries.invalidate(&key);
        // No receivers is fine
        let _ = self.invalidations.send(key);
    }

    fn invalidate_prefix_local(&self, prefix: &str) {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, _)| key_path(key).is_some_and(|path| path.starts_with(prefix)))
            .map(|(key, _)| (*key).clone())
            .collect();

        debug!(prefix, count = keys.len(), "Invalidating cache entries");
        for key in keys {
            self.invalidate_local(&key);
        }
    }

    fn publish_invalidation(&self, key: Option<&str>, prefix: Option<&str>) {
        let message = RemoteInvalidation {
            origin: self.id.clone(),
            key: key.map(str::to_string),
            prefix: prefix.map(str::to_string),
        };

        let result = serde_json::to_vec(&message)
            .map_err(|e| Error::driver("Failed to encode cache invalidation", e))
            .and_then(|payload| self.channel.publish(INVALIDATION_TOPIC, &payload));

        // Best-effort: remote caches may serve stale data until their next write
        if let Err(e) = result {
            warn!(error = %e, "Failed to broadcast cache invalidation");
        }
    }

    fn apply_remote(&self, envelope: &Envelope) {
        let message: RemoteInvalidation = match serde_json::from_slice(&envelope.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(id = %envelope.id, error = %e, "Ignoring malformed cache invalidation");
                return;
            },
        };

        if message.origin == self.id {
            return;
        }
        if let Some(key) = &message.key {
            debug!(key = %key, "Remote cache invalidation");
            self.invalidate_local(key);
        }
        if let Some(prefix) = &message.prefix {
            self.invalidate_prefix_local(prefix);
        }
    }
}

#[async_trait]
impl ObjectCache for MemoryObjectCache {
    async fn has(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_string())
    }

    async fn get(&self, key: &str) -> Result<CacheValue> {
        self.entries
            .get(&key.to_string())
            .ok_or_else(|| Error::not_found(key))
    }

    async fn set(&self, key: &str, value: CacheValue) {
        self.entries.insert(key.to_string(), value);
    }

    async fn invalidate(&self, key: &str) {
        self.invalidate_local(key);
        self.publish_invalidation(Some(key), None);
    }

    async fn invalidate_starting_with(&self, prefix: &str) {
        self.invalidate_prefix_local(prefix);
        self.publish_invalidation(None, Some(prefix));
    }

    async fn sync(&self, message: &SyncMessage) -> Result<()> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| Error::driver("Failed to encode sync message", e))?;
        let reached = self.channel.publish(SYNC_TOPIC, &payload)?;
        debug!(root_folder = %message.root_folder, reached, "Published sync request");
        Ok(())
    }

    fn subscribe_invalidations(&self) -> broadcast::Receiver<String> {
        self.invalidations.subscribe()
    }

    fn subscribe_sync(&self) -> broadcast::Receiver<Envelope> {
        self.channel.subscribe(SYNC_TOPIC)
    }

    fn listen_remote(self: Arc<Self>) -> JoinHandle<()> {
        // Subscribe before spawning so nothing published after this call is missed
        let mut rx = self.channel.subscribe(INVALIDATION_TOPIC);
        let cache: Weak<Self> = Arc::downgrade(&self);
        drop(self);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        cache.apply_remote(&envelope);
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Cache invalidation listener lagged, entries may be stale");
                    },
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
