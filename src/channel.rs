//! Cross-process notification channel.
//!
//! The file service only needs "publish a small JSON envelope" and "receive
//! and dispatch a small JSON envelope". [`SyncChannel`] captures exactly that;
//! [`LocalSyncChannel`] implements it over broadcast channels for single-node
//! deployments and tests. A clustered deployment plugs its message bus in
//! behind the same trait.
//!
//! Delivery is best-effort. A dropped or lagged message means a remote cache
//! may serve stale content until its next local write or restart.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::constants::CHANNEL_CAPACITY;
use crate::error::Result;

/// Message delivered on a topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message identifier (UUID v4).
    pub id: String,
    /// Message payload (JSON).
    pub payload: Vec<u8>,
    /// Timestamp when the message was published.
    pub created_at: DateTime<Utc>,
}

/// Request to mirror database files of a folder onto disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub root_folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
}

/// Publish/subscribe transport shared by every process of a deployment.
pub trait SyncChannel: Send + Sync + 'static {
    /// Publish `payload` to every subscriber of `topic`.
    ///
    /// Returns the number of subscribers reached (0 is not an error).
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the message.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize>;

    /// Subscribe to `topic`.
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope>;
}

/// Single-node [`SyncChannel`].
///
/// Topics come into existence on first subscribe. Publishing to a topic no
/// listener has opened yet reaches nobody, so a cache that starts listening
/// late misses the invalidations published before it.
#[derive(Default)]
pub struct LocalSyncChannel {
    topics: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
}

impl LocalSyncChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live receivers on `topic`, e.g. one per listening cache.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl SyncChannel for LocalSyncChannel {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize> {
        let topics = self.topics.read();
        let Some(sender) = topics.get(topic) else {
            trace!(topic, "No listener for topic, message dropped");
            return Ok(0);
        };

        let envelope = Envelope {
            id: Uuid::new_v4().to_string(),
            payload: payload.to_vec(),
            created_at: Utc::now(),
        };
        // Every receiver of a topic may have been dropped since it was opened
        Ok(sender.send(envelope).unwrap_or(0))
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope> {
        self.topics
            .write()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}
