// SPDX-License-Identifier: MIT

//! Per-flow-id mutual exclusion

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// Serializes load-mutate-save sequences on the same flow id.
///
/// Entries are removed once no caller holds or waits on them.
#[derive(Default)]
pub(crate) struct LockTable {
    locks: Mutex<LockMap>,
}

/// Held for the duration of one transition on `id`
pub(crate) struct FlowGuard<'a> {
    table: &'a LockTable,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LockTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn acquire(&self, id: &str) -> FlowGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        FlowGuard {
            table: self,
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.table.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get(&self.id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(&self.id);
            }
        }
    }
}
