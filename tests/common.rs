//! Shared harness for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ghostfs::{
    DatabaseStorageDriver, DiskStorageDriver, FileLimits, GhostService, LocalSyncChannel,
    MemoryObjectCache, ScopeBackends, SyncChannel, UpsertOptions,
};
use tempfile::TempDir;

/// Registry over a throwaway project directory.
pub struct TestGhost {
    pub dir: TempDir,
    pub channel: Arc<LocalSyncChannel>,
    pub ghost: Arc<GhostService>,
}

impl TestGhost {
    /// Disk- or database-backed registry with default limits.
    pub fn new(use_db: bool) -> Self {
        Self::with_limits(use_db, FileLimits::default())
    }

    pub fn with_limits(use_db: bool, limits: FileLimits) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let channel = Arc::new(LocalSyncChannel::new());
        let ghost = Self::build(&dir, channel.clone(), limits, use_db);
        Self {
            dir,
            channel,
            ghost,
        }
    }

    /// Second registry on the same project, database and channel, with its
    /// own cache, standing in for another process.
    pub fn peer(&self, use_db: bool) -> Arc<GhostService> {
        Self::build(&self.dir, self.channel.clone(), FileLimits::default(), use_db)
    }

    fn build(
        dir: &TempDir,
        channel: Arc<LocalSyncChannel>,
        limits: FileLimits,
        use_db: bool,
    ) -> Arc<GhostService> {
        let channel: Arc<dyn SyncChannel> = channel;
        let backends = ScopeBackends {
            disk: Arc::new(DiskStorageDriver::new(dir.path())),
            db: Arc::new(
                DatabaseStorageDriver::open(dir.path().join("storage.sqlite")).expect("database"),
            ),
            cache: Arc::new(MemoryObjectCache::new(channel, None)),
        };
        Arc::new(GhostService::new(backends, limits, use_db))
    }
}

/// Both driver choices, for tests that must hold for each.
pub const DRIVERS: [bool; 2] = [false, true];

pub fn ignore_lock() -> UpsertOptions {
    UpsertOptions {
        ignore_lock: true,
        ..UpsertOptions::default()
    }
}

/// Polls `check` until it holds or a second elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
