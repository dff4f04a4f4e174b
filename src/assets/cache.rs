//! Run-scoped single-flight resolution cache
//!
//! Maps an exact URL string to one shared resolution. The first requester
//! inserts an empty cell and drives the resolution; everyone else awaits the
//! same cell and reads the value it was filled with. Cells are written once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// What a cache lookup produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome<T> {
    /// Value shared with every other requester of the same key.
    Shared(T),
    /// The entry ceiling was reached before this key was seen; nothing was
    /// resolved or stored.
    OverCapacity,
}

/// Single-flight cache. Created at the start of a run and dropped at its end.
pub struct ResolutionCache<T> {
    entries: Mutex<HashMap<String, Arc<OnceCell<T>>>>,
    max_entries: Option<usize>,
}

impl<T: Clone> ResolutionCache<T> {
    /// Unbounded cache.
    pub fn new() -> Self {
        Self::with_max_entries(None)
    }

    /// Cache that refuses to track more than `max_entries` distinct keys.
    pub fn with_max_entries(max_entries: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    fn cell(&self, key: &str) -> Option<Arc<OnceCell<T>>> {
        let mut entries = self.entries.lock();
        if let Some(cell) = entries.get(key) {
            return Some(cell.clone());
        }
        if self.max_entries.is_some_and(|max| entries.len() >= max) {
            return None;
        }
        let cell = Arc::new(OnceCell::new());
        entries.insert(key.to_string(), cell.clone());
        Some(cell)
    }

    /// Return the value for `key`, running `resolve` only if no other caller
    /// has claimed the key in this run.
    pub async fn get_or_resolve<F, Fut>(&self, key: &str, resolve: F) -> CacheOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(cell) = self.cell(key) else {
            return CacheOutcome::OverCapacity;
        };
        CacheOutcome::Shared(cell.get_or_init(resolve).await.clone())
    }

    /// Completed value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<T> {
        self.entries
            .lock()
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Number of distinct keys claimed so far.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for ResolutionCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
