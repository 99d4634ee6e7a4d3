//! Shared state store, per-process mirrors, and the serializer probe.
//!
//! The main process holds the authoritative [`SharedStore`]: a map of the
//! Brain's public attributes with a monotonic version counter per key. Every
//! process works against a [`Mirror`], a local view of that map; a
//! synchronization routine ferries changes in both directions once per tick:
//! dirty mirror entries flush to the store, then store entries with a newer
//! version pull back into the mirror. A key dirtied within the current tick
//! keeps the writer's pending value.
//!
//! Conflict policy is last-writer-wins per key at tick granularity; versions
//! only break ties between a store and a mirror, not between two writers.
//!
//! # High-level architecture
//!
//! ```text
//!  main process                          child process
//!  ┌──────────┐  flush/pull  ┌────────┐   Sync/SyncReply   ┌──────────┐
//!  │  Mirror  │ ◄──────────► │ Store  │ ◄────── wire ─────► │  Mirror  │
//!  └────▲─────┘  (in-proc)   └────────┘                     └────▲─────┘
//!       │ get/set                                                │ get/set
//!    task code                                               task code
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::logger::{LogLevel, LoggerRef};

/// Decides whether a value is safe to place in the cross-process store.
///
/// A value passes iff it converts to a JSON value: integers, floats, strings,
/// sequences, maps with string keys, tuples, unit. Containers are accepted on
/// face value; no recursive inspection beyond what serialization itself does.
pub fn probe<T: Serialize>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value)
}

/// Warning emitted when an attribute fails the probe.
pub(crate) fn probe_warning(logger: &LoggerRef, name: &str) {
    logger.log(
        &format!("[dynamic_init] cannot serialize attribute [{name}]."),
        LogLevel::Warning,
    );
}

#[derive(Clone, Debug)]
struct Versioned {
    value: Value,
    version: u64,
}

/// Authoritative cross-process map of a Brain's shared attributes.
///
/// Held by the main process; children reach it through the wire protocol.
/// Writing a value equal to the current one leaves the entry (and its
/// version) untouched.
#[derive(Clone, Default)]
pub struct SharedStore {
    inner: Arc<RwLock<HashMap<String, Versioned>>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a key, returning the entry's version afterwards.
    pub(crate) fn put(&self, key: &str, value: Value) -> u64 {
        let mut map = match self.inner.write() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if let Some(entry) = map.get_mut(key) {
            if entry.value != value {
                entry.value = value;
                entry.version += 1;
            }
            return entry.version;
        }
        map.insert(key.to_string(), Versioned { value, version: 1 });
        1
    }

    pub(crate) fn get(&self, key: &str) -> Option<(Value, u64)> {
        let map = match self.inner.read() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        map.get(key).map(|e| (e.value.clone(), e.version))
    }

    /// Full dump, used to seed a freshly spawned child.
    pub(crate) fn snapshot(&self) -> Vec<(String, Value, u64)> {
        let map = match self.inner.read() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        map.iter()
            .map(|(k, e)| (k.clone(), e.value.clone(), e.version))
            .collect()
    }

    /// Entries whose version is newer than what the caller already knows.
    pub(crate) fn changed_since(&self, known: &HashMap<String, u64>) -> Vec<(String, Value, u64)> {
        let map = match self.inner.read() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        map.iter()
            .filter(|(k, e)| known.get(*k).map_or(true, |v| *v < e.version))
            .map(|(k, e)| (k.clone(), e.value.clone(), e.version))
            .collect()
    }
}

#[derive(Debug)]
struct MirrorEntry {
    value: Value,
    version: u64,
    dirty: bool,
}

/// Per-process local view of the shared store.
///
/// Names starting with `_` are process-private: they live in the mirror and
/// never reach the store.
#[derive(Debug, Default)]
pub(crate) struct Mirror {
    entries: HashMap<String, MirrorEntry>,
    private: HashMap<String, Value>,
}

impl Mirror {
    /// Installs an entry already present in the store (no dirty mark).
    pub(crate) fn seed_one(&mut self, key: &str, value: Value, version: u64) {
        self.entries.insert(
            key.to_string(),
            MirrorEntry {
                value,
                version,
                dirty: false,
            },
        );
    }

    /// Replaces the public view with an authoritative store dump.
    pub(crate) fn seed(&mut self, entries: Vec<(String, Value, u64)>) {
        self.entries.clear();
        for (key, value, version) in entries {
            self.seed_one(&key, value, version);
        }
    }

    pub(crate) fn read(&self, key: &str) -> Option<&Value> {
        self.entries
            .get(key)
            .map(|e| &e.value)
            .or_else(|| self.private.get(key))
    }

    /// Local write; becomes visible to other processes at the next sync tick.
    /// Writing the current value is a no-op.
    pub(crate) fn write(&mut self, key: &str, value: Value) {
        if key.starts_with('_') {
            self.private.insert(key.to_string(), value);
            return;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.value != value {
                entry.value = value;
                entry.dirty = true;
            }
            return;
        }
        self.entries.insert(
            key.to_string(),
            MirrorEntry {
                value,
                version: 0,
                dirty: true,
            },
        );
    }

    /// Drains dirty entries for the wire; clears their dirty marks.
    pub(crate) fn take_writes(&mut self) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        for (k, e) in self.entries.iter_mut() {
            if e.dirty {
                e.dirty = false;
                out.push((k.clone(), e.value.clone()));
            }
        }
        out
    }

    pub(crate) fn known_versions(&self) -> HashMap<String, u64> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.version))
            .collect()
    }

    /// Applies store-side updates, skipping keys re-dirtied since the sync
    /// request went out (the writer's pending value is newest within a tick).
    pub(crate) fn apply_updates(&mut self, updates: Vec<(String, Value, u64)>) {
        for (key, value, version) in updates {
            if let Some(entry) = self.entries.get_mut(&key) {
                if !entry.dirty {
                    entry.value = value;
                    entry.version = version;
                }
                continue;
            }
            self.seed_one(&key, value, version);
        }
    }

    /// mirror -> store half of an in-process sync tick.
    pub(crate) fn flush_to(&mut self, store: &SharedStore) {
        for (k, e) in self.entries.iter_mut() {
            if e.dirty {
                e.version = store.put(k, e.value.clone());
                e.dirty = false;
            }
        }
    }

    /// store -> mirror half of an in-process sync tick.
    pub(crate) fn pull_from(&mut self, store: &SharedStore) {
        let known = self.known_versions();
        let updates = store.changed_since(&known);
        self.apply_updates(updates);
    }
}

/// Clonable handle task code uses to read and write shared attributes.
#[derive(Clone)]
pub struct Shared {
    pub(crate) mirror: Arc<Mutex<Mirror>>,
    pub(crate) logger: LoggerRef,
}

impl Shared {
    pub(crate) fn new(mirror: Arc<Mutex<Mirror>>, logger: LoggerRef) -> Self {
        Self { mirror, logger }
    }

    /// Reads a shared attribute, deserializing into the requested type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let guard = self.mirror.lock().ok()?;
        let value = guard.read(key)?.clone();
        drop(guard);
        serde_json::from_value(value).ok()
    }

    /// Reads a shared attribute as a raw JSON value.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.mirror.lock().ok()?.read(key).cloned()
    }

    /// Writes a shared attribute; returns whether the value passed the probe.
    ///
    /// A failed probe logs a warning and leaves the store untouched.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> bool {
        match probe(&value) {
            Ok(json) => {
                if let Ok(mut guard) = self.mirror.lock() {
                    guard.write(key, json);
                }
                true
            }
            Err(_) => {
                probe_warning(&self.logger, key);
                false
            }
        }
    }
}
