//! Open-file handles retained across requests.
//!
//! When `open`, `create` or `opendir` return a value the engine must keep,
//! it is stored here under a fresh id that the kernel echoes back in every
//! later request on that open file. Id 0 means "nothing retained".

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// The id reported for opens that retain nothing.
pub const NO_HANDLE: u64 = 0;

/// Thread-safe table of retained values with auto-incrementing ids.
#[derive(Debug)]
pub struct HandleTable<V> {
    handles: DashMap<u64, V>,
    next_id: AtomicU64,
}

impl<V> HandleTable<V> {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores `value` and returns its id, never [`NO_HANDLE`].
    pub fn insert(&self, value: V) -> u64 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == NO_HANDLE {
                continue;
            }
            if let Entry::Vacant(slot) = self.handles.entry(id) {
                slot.insert(value);
                return id;
            }
        }
    }

    pub fn remove(&self, id: u64) -> Option<V> {
        self.handles.remove(&id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.handles.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<V: Clone> HandleTable<V> {
    /// A copy of the value stored under `id`. [`NO_HANDLE`] and unknown ids
    /// yield `None`.
    pub fn get(&self, id: u64) -> Option<V> {
        self.handles.get(&id).map(|v| v.clone())
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
