use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// In-process mutual exclusion keyed by logical entity id.
///
/// Serializes lookup-then-write sequences issued by this instance against the
/// same project or thread. Separate processes sharing the remote store are
/// not coordinated.
#[derive(Clone, Default)]
pub struct EntityLocks {
    table: Arc<LockTable>,
}

pub struct EntityGuard {
    key: String,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> EntityGuard {
        let entry = {
            let mut table = self.table.lock();
            table
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        // Declared before the acquire future so a cancelled waiter releases its
        // reference first and the cleanup below sees the real count.
        let mut pending = PendingLock {
            key,
            table: &self.table,
            armed: true,
        };
        let guard = {
            let acquire = entry.lock_owned();
            acquire.await
        };
        pending.armed = false;
        EntityGuard {
            key: key.to_string(),
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.table.lock().len()
    }
}

/// Dropped without being disarmed only when a waiter is cancelled.
struct PendingLock<'a> {
    key: &'a str,
    table: &'a LockTable,
    armed: bool,
}

impl Drop for PendingLock<'_> {
    fn drop(&mut self) {
        if self.armed {
            remove_if_idle(&mut self.table.lock(), self.key);
        }
    }
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        drop(self.guard.take());
        remove_if_idle(&mut table, &self.key);
    }
}

fn remove_if_idle(table: &mut HashMap<String, Arc<AsyncMutex<()>>>, key: &str) {
    // Only the table itself still references the mutex: nobody holds or waits.
    let idle = table
        .get(key)
        .is_some_and(|entry| Arc::strong_count(entry) == 1);
    if idle {
        table.remove(key);
    }
}
