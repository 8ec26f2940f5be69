use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::OnceCell;

/// Per-run memo of remote fetches.
///
/// Each key is fetched at most once for the lifetime of the cache, also when
/// several workers ask for it at the same time: they block on the same slot
/// until the first fetch completes. Absent results are remembered as well.
pub struct FetchCache<K, V> {
    slots: Mutex<HashMap<K, Arc<OnceCell<Option<V>>>>>,
    fetches: AtomicUsize,
}

impl<K, V> Default for FetchCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl<K, V> FetchCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_fetch(&self, key: K, fetch: impl FnOnce() -> Option<V>) -> Option<V> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key).or_default())
        };
        slot.get_or_init(|| {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            fetch()
        })
        .clone()
    }

    /// Number of fetch closures actually run.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
