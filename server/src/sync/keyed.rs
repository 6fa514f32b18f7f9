//! Per-key mutual exclusion
//!
//! Each key gets its own async mutex, created on first use and never
//! removed. The guarded value lets callers keep per-key state (such as a
//! release state machine) next to the lock that serializes it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-key locks
pub struct KeyedLocks<T> {
    entries: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T: Default> KeyedLocks<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get the lock for `key`, creating it if needed
    pub async fn entry(&self, key: &str) -> Arc<Mutex<T>> {
        let mut entries = self.entries.lock().await;
        entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(T::default())))
            .clone()
    }

    /// Acquire the lock for `key`
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<T> {
        self.entry(key).await.lock_owned().await
    }
}

impl<T: Default> Default for KeyedLocks<T> {
    fn default() -> Self {
        Self::new()
    }
}
