use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const PRUNE_THRESHOLD: usize = 1024;

/// Registry of per-key mutexes, e.g. one per court or per invoice.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// The mutexes for a set of keys, in acquisition order.
pub struct LockSet {
    handles: Vec<Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys are sorted and deduplicated so overlapping callers always lock in
    /// the same order.
    pub fn set(&self, keys: &[&str]) -> LockSet {
        let mut keys: Vec<&str> = keys.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks.len() >= PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        let handles = keys
            .into_iter()
            .map(|key| Arc::clone(locks.entry(key.to_string()).or_default()))
            .collect();
        LockSet { handles }
    }
}

impl LockSet {
    /// Blocks until every key is held; all are released when the returned
    /// guards drop.
    pub fn acquire(&self) -> Vec<MutexGuard<'_, ()>> {
        self.handles
            .iter()
            .map(|lock| lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

pub fn court_key(court_id: &str) -> String {
    format!("court:{court_id}")
}

pub fn invoice_key(invoice_id: &str) -> String {
    format!("invoice:{invoice_id}")
}
