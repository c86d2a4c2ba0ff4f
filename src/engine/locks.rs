//! Per-path mutual exclusion.
//!
//! Ingestion and removal of one path run one at a time; different paths do
//! not contend. Lock slots are created on demand and dropped when the last
//! holder releases them, so the map only holds paths in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct PathLocks {
    slots: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `path`.
    pub fn with<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let slot = {
            let mut slots = self.slots.lock().expect("path lock map mutex poisoned");
            Arc::clone(slots.entry(path.to_path_buf()).or_default())
        };

        let result = {
            // A panic in another holder leaves nothing to repair in a `()` lock.
            let _held = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut slots = self.slots.lock().expect("path lock map mutex poisoned");
        if slots
            .get(path)
            .is_some_and(|s| Arc::strong_count(s) == 2 && Arc::ptr_eq(s, &slot))
        {
            slots.remove(path);
        }
        result
    }

    /// Paths currently locked or awaited.
    pub fn in_flight(&self) -> usize {
        self.slots.lock().expect("path lock map mutex poisoned").len()
    }
}
