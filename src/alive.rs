//! Tracks which auto-start tasks are still running.
//!
//! The supervisor inserts a task's name when it spawns it and the task
//! removes itself when its report lands; the snapshot names whoever is still
//! alive when the shutdown grace runs out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub(crate) struct AliveTracker {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl AliveTracker {
    pub(crate) fn insert(&self, name: &str) {
        if let Ok(mut set) = self.inner.lock() {
            set.insert(name.to_string());
        }
    }

    pub(crate) fn remove(&self, name: &str) {
        if let Ok(mut set) = self.inner.lock() {
            set.remove(name);
        }
    }

    /// Sorted names of tasks still alive.
    pub(crate) fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.inner.lock() {
            Ok(set) => set.iter().cloned().collect(),
            Err(p) => p.into_inner().iter().cloned().collect(),
        };
        names.sort_unstable();
        names
    }
}
