use parking_lot::RwLock;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// State shared by the pool and replica controllers
///
/// Holds the lock serialising ZFS command sequences, the datasets found at
/// pool import, and the broadcast "pool is imported" flag.
pub struct PoolCoordination {
    zfs_lock: Mutex<()>,
    imported_datasets: RwLock<Vec<String>>,
    imported: watch::Sender<bool>,
}

impl Default for PoolCoordination {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolCoordination {
    pub fn new() -> Self {
        let (imported, _) = watch::channel(false);
        Self {
            zfs_lock: Mutex::new(()),
            imported_datasets: RwLock::new(Vec::new()),
            imported,
        }
    }

    /// Hold while issuing ZFS calls that must not interleave
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.zfs_lock.lock().await
    }

    pub fn publish_datasets(&self, datasets: Vec<String>) {
        *self.imported_datasets.write() = datasets;
    }

    pub fn imported_datasets(&self) -> Vec<String> {
        self.imported_datasets.read().clone()
    }

    pub fn contains_dataset(&self, dataset: &str) -> bool {
        self.imported_datasets.read().iter().any(|d| d == dataset)
    }

    pub fn set_imported(&self) {
        self.imported.send_replace(true);
    }

    pub fn reset_imported(&self) {
        self.imported.send_replace(false);
    }

    pub fn is_imported(&self) -> bool {
        *self.imported.borrow()
    }

    /// Wait until the pool is imported; false when cancelled first
    pub async fn wait_imported(&self, token: &CancellationToken) -> bool {
        let mut rx = self.imported.subscribe();
        tokio::select! {
            _ = token.cancelled() => false,
            result = rx.wait_for(|imported| *imported) => result.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_waiters_released_on_import() {
        let coordination = Arc::new(PoolCoordination::new());
        let token = CancellationToken::new();

        let waiter = {
            let coordination = coordination.clone();
            let token = token.clone();
            tokio::spawn(async move { coordination.wait_imported(&token).await })
        };
        tokio::task::yield_now().await;
        assert!(!coordination.is_imported());

        coordination.set_imported();
        assert!(waiter.await.unwrap());
        assert!(coordination.is_imported());

        coordination.reset_imported();
        assert!(!coordination.is_imported());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancelled() {
        let coordination = PoolCoordination::new();
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
        assert!(!coordination.wait_imported(&token).await);
    }

    #[tokio::test]
    async fn test_dataset_publication() {
        let coordination = PoolCoordination::new();
        coordination.publish_datasets(vec!["cstor-aaaa/vol1".to_string()]);
        assert!(coordination.contains_dataset("cstor-aaaa/vol1"));
        assert!(!coordination.contains_dataset("cstor-aaaa/vol2"));

        let _guard = coordination.lock().await;
        assert!(coordination.zfs_lock.try_lock().is_err());
    }
}
