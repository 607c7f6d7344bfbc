//! Versioned config store with change notification.
//!
//! The poll loop reads its [`PollConfig`](super::PollConfig) from a
//! `ConfigStore` at the top of every iteration; a SIGHUP reload replaces
//! the value and bumps the version so watchers can react.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, watch};

/// A shared, versioned value with change notification.
pub struct ConfigStore<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    data: RwLock<T>,
    version_tx: watch::Sender<u64>,
}

/// Receives notifications when a [`ConfigStore`] is updated.
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(Inner {
                data: RwLock::new(initial),
                version_tx,
            }),
        }
    }

    /// Replace the stored value and notify all watchers.
    pub async fn update(&self, value: T) {
        self.modify(|current| *current = value).await;
    }

    /// Mutate the stored value in place and notify all watchers.
    pub async fn modify(&self, f: impl FnOnce(&mut T)) {
        let mut guard = self.inner.data.write().await;
        f(&mut guard);
        // Release the write lock before waking watchers.
        drop(guard);
        self.inner.version_tx.send_modify(|v| *v += 1);
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.data.read().await
    }

    /// Number of updates applied since construction.
    pub fn version(&self) -> u64 {
        *self.inner.version_tx.borrow()
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

impl<T: Clone> ConfigStore<T> {
    /// Clone the current value out of the lock.
    pub async fn snapshot(&self) -> T {
        self.inner.data.read().await.clone()
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConfigWatcher {
    /// Wait until the store is updated.
    ///
    /// Returns `Err` once every [`ConfigStore`] handle has been dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.version_rx.changed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_bumps_version_and_wakes_watchers() {
        let store = ConfigStore::new(1u32);
        let mut watcher = store.subscribe();
        assert_eq!(store.version(), 0);

        store.update(2).await;
        watcher.changed().await.unwrap();
        assert_eq!(*store.read().await, 2);
        assert_eq!(store.version(), 1);

        store.modify(|v| *v += 40).await;
        assert_eq!(store.snapshot().await, 42);
        assert_eq!(store.version(), 2);
    }

    #[tokio::test]
    async fn test_watcher_errors_after_store_dropped() {
        let store = ConfigStore::new(());
        let mut watcher = store.subscribe();
        drop(store);
        assert!(watcher.changed().await.is_err());
    }
}
