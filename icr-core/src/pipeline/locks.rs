//! Per-key async locks.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes work per key (for example per label-set hash) while letting
/// different keys proceed concurrently. Idle entries are removed on release.
#[derive(Debug, Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub struct KeyedGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        KeyedGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Keys currently locked or waited on.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // Map + this guard hold the only references when nobody is waiting.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) <= 2);
    }
}
