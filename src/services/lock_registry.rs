//! Keyed locks for blob content and thumbnail generation.
//!
//! Two independent maps, both populated lazily:
//! - blob locks are reader/writer locks kept for the life of the process
//!   (bounded by the number of blob ids ever touched);
//! - thumbnail locks are plain mutexes that live only while a generation for
//!   their key is in flight and are dropped by the last holder.

use crate::models::node::BlobId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

type ThumbnailLocks = DashMap<String, Arc<Mutex<()>>>;

#[derive(Default)]
pub struct LockRegistry {
    blob_locks: DashMap<BlobId, Arc<RwLock<()>>>,
    thumbnail_locks: Arc<ThumbnailLocks>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The reader/writer lock guarding one blob id, created on first use.
    pub fn blob_lock(&self, blob_id: BlobId) -> Arc<RwLock<()>> {
        self.blob_locks
            .entry(blob_id)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Shared access to a blob's content. Concurrent readers do not block each other.
    pub async fn read_blob(&self, blob_id: BlobId) -> OwnedRwLockReadGuard<()> {
        self.blob_lock(blob_id).read_owned().await
    }

    /// Exclusive access to a blob's content.
    pub async fn write_blob(&self, blob_id: BlobId) -> OwnedRwLockWriteGuard<()> {
        self.blob_lock(blob_id).write_owned().await
    }

    /// Acquire the generation lock for a thumbnail key.
    ///
    /// The returned lease releases the mutex on drop and removes the map entry
    /// when no other request is waiting on the same key, whether or not the
    /// generation succeeded. Entries orphaned by cancelled waiters are swept on
    /// the next acquisition.
    pub async fn thumbnail_lock(&self, key: &str) -> ThumbnailLease {
        // Entries nobody holds or waits on are left behind by waiters that
        // were cancelled after the holder released. Reclaim them here.
        self.thumbnail_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        let lock = self
            .thumbnail_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ThumbnailLease {
            key: key.to_string(),
            locks: Arc::clone(&self.thumbnail_locks),
            _guard: Some(guard),
        }
    }

    /// Number of thumbnail keys with a generation in flight (or queued).
    pub fn thumbnail_locks_in_flight(&self) -> usize {
        self.thumbnail_locks.len()
    }

    pub fn blob_locks_len(&self) -> usize {
        self.blob_locks.len()
    }
}

/// Held by the single request generating a thumbnail for `key`.
pub struct ThumbnailLease {
    key: String,
    locks: Arc<ThumbnailLocks>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ThumbnailLease {
    fn drop(&mut self) {
        // Release first so a waiter can proceed, then drop the entry if nobody
        // else holds a handle to this mutex. Waiters clone the Arc under the
        // shard lock, which `remove_if` also takes, so the count is stable here.
        self._guard.take();
        let removed = self
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
        if removed.is_some() {
            trace!(key = %self.key, "thumbnail lock discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn blob_lock_is_shared_per_id() {
        let registry = LockRegistry::new();
        let a = registry.blob_lock(1);
        let b = registry.blob_lock(1);
        let c = registry.blob_lock(2);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.blob_locks_len(), 2);
    }

    #[tokio::test]
    async fn readers_share_but_writer_excludes() {
        let registry = LockRegistry::new();
        let r1 = registry.read_blob(9).await;
        let r2 = registry.read_blob(9).await;

        let lock = registry.blob_lock(9);
        assert!(lock.try_write().is_err());
        drop(r1);
        drop(r2);

        let _w = registry.write_blob(9).await;
        assert!(lock.try_read().is_err());
        // Other ids are unaffected.
        assert!(registry.blob_lock(10).try_write().is_ok());
    }

    #[tokio::test]
    async fn thumbnail_lock_is_discarded_after_release() {
        let registry = LockRegistry::new();
        {
            let _lease = registry.thumbnail_lock("thumb_1").await;
            assert_eq!(registry.thumbnail_locks_in_flight(), 1);
        }
        assert_eq!(registry.thumbnail_locks_in_flight(), 0);
    }

    #[tokio::test]
    async fn thumbnail_lock_survives_while_waiters_queue() {
        let registry = Arc::new(LockRegistry::new());
        let first = registry.thumbnail_lock("thumb_2").await;

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _lease = registry.thumbnail_lock("thumb_2").await;
                registry.thumbnail_locks_in_flight()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(first);
        // The waiter still held a handle, so the entry stayed until it finished.
        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(registry.thumbnail_locks_in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_entry_is_swept() {
        let registry = LockRegistry::new();
        let holder = registry.thumbnail_lock("thumb_3").await;

        let mut waiter = Box::pin(registry.thumbnail_lock("thumb_3"));
        assert!(futures::poll!(waiter.as_mut()).is_pending());

        // Holder releases while the waiter is queued, then the waiter is abandoned.
        drop(holder);
        drop(waiter);
        assert_eq!(registry.thumbnail_locks_in_flight(), 1);

        let other = registry.thumbnail_lock("thumb_4").await;
        assert_eq!(registry.thumbnail_locks_in_flight(), 1);
        drop(other);
        assert_eq!(registry.thumbnail_locks_in_flight(), 0);
    }
}
