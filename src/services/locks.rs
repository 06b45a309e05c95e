//! Per-user mutual exclusion for cart and checkout mutations.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::value_objects::UserId;

#[derive(Clone, Default)]
pub struct UserLocks {
    locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self { Self::default() }

    /// Waits until no other task holds `user`'s lock. Dropping the guard
    /// releases it.
    pub async fn acquire(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries nobody else references are stale; drop them while we are here.
            locks.retain(|id, lock| *id == user || Arc::strong_count(lock) > 1);
            locks.entry(user).or_default().clone()
        };
        lock.lock_owned().await
    }
}
