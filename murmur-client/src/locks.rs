use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::api::{CommentId, UserId};

type Key = (CommentId, UserId);

/// One async mutex per (comment, user) pair currently being voted on, so that
/// read-decide-commit never interleaves for the same pair in this process
#[derive(Default)]
pub struct PairLocks(Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>);

pub struct PairGuard<'a> {
    locks: &'a PairLocks,
    key: Key,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PairLocks {
    pub async fn lock(&self, comment: CommentId, user: UserId) -> PairGuard<'_> {
        let key = (comment, user);
        let mutex = {
            let mut map = self.0.lock();
            // a lock() dropped while waiting leaves an entry nobody will release
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(key).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        PairGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        std::mem::drop(self.guard.take());
        let mut map = self.locks.0.lock();
        // waiters hold a clone of the Arc, so a count of 1 means only the map is left
        if map
            .get(&self.key)
            .map_or(false, |m| Arc::strong_count(m) == 1)
        {
            map.remove(&self.key);
        }
    }
}
