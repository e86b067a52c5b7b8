//! Per-name exclusive sections.
//!
//! Every multi-step operation on one object name runs while holding that
//! name's guard, so a put racing a delete (or two deletes) never interleave.
//! Distinct names map to distinct mutexes and never contend. Entries are
//! dropped from the table once the last holder or waiter goes away.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

#[derive(Clone, Default)]
pub struct NameLocks {
    table: Arc<LockTable>,
}

/// Held for the duration of an operation on `name`. Owned, so it can move
/// into a spawned task.
pub struct NameGuard {
    name: String,
    table: Arc<LockTable>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> NameGuard {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let guard = entry.lock_owned().await;
        NameGuard {
            name: name.to_string(),
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl NameGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        // Release the mutex before inspecting the table so waiters still
        // holding a clone keep the entry alive.
        self.guard.take();

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let unused = table
            .get(&self.name)
            .is_some_and(|entry| Arc::strong_count(entry) == 1);
        if unused {
            table.remove(&self.name);
        }
    }
}
