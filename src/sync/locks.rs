use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-owner write exclusivity for the ledger read-modify-write.
///
/// Runs for different owners proceed in parallel; runs for the same owner
/// queue behind each other. Entries are never evicted, one small mutex per
/// owner ever seen by the process.
#[derive(Clone, Default)]
pub struct OwnerLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of `owner`. Released when the guard drops.
    pub async fn acquire(&self, owner: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard guard is not held across the await.
        let lock = self
            .inner
            .entry(owner.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
