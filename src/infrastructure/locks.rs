use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::TransactionId;

/// Row-level locks keyed by transaction id.
///
/// Waiters that already cloned the per-id mutex keep serializing on it even
/// after the entry is dropped from the map, so removal is safe while the row
/// is still locked.
#[derive(Default)]
pub(crate) struct LockMap {
    locks: StdMutex<HashMap<TransactionId, Arc<Mutex<()>>>>,
}

impl LockMap {
    pub(crate) async fn acquire(&self, id: TransactionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock map poisoned");
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the registry entry for a deleted row.
    pub(crate) fn forget(&self, id: TransactionId) {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        locks.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_acquire_waits_for_first() {
        let locks = Arc::new(LockMap::default());
        let guard = locks.acquire(1).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(1).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_ids_do_not_contend() {
        let locks = LockMap::default();
        let _a = locks.acquire(1).await;
        let _b = locks.acquire(2).await;
    }
}
