//! Cross-process wire protocol.
//!
//! Line-delimited JSON over the child's stdin/stdout. The parent writes
//! [`ParentMsg`] lines, the child answers with [`ChildMsg`] lines; a single
//! pipe per direction keeps requests to one child ordered.
//!
//! `Run`/`Report` pairs are correlated by `id`; `Sync`/`SyncReply` carry the
//! mirror <-> store reconciliation; `Log` forwards child-side log lines to
//! the parent's logger.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::logger::LogLevel;
use crate::report::TaskReport;

/// One shared-store entry on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreEntry {
    pub key: String,
    pub value: Value,
    pub version: u64,
}

impl StoreEntry {
    pub(crate) fn from_tuples(entries: Vec<(String, Value, u64)>) -> Vec<Self> {
        entries
            .into_iter()
            .map(|(key, value, version)| Self {
                key,
                value,
                version,
            })
            .collect()
    }

    pub(crate) fn into_tuples(entries: Vec<Self>) -> Vec<(String, Value, u64)> {
        entries
            .into_iter()
            .map(|e| (e.key, e.value, e.version))
            .collect()
    }
}

/// Messages the parent sends to a child.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum ParentMsg {
    /// Authoritative store dump sent right after spawn.
    Seed { entries: Vec<StoreEntry> },
    /// Execute a registered task to completion.
    Run { id: u64, task: String },
    /// Soft-abort the identified in-flight run.
    Cancel { id: u64 },
    /// Store-side updates answering a `Sync`.
    SyncReply { updates: Vec<StoreEntry> },
    /// Stop serving and exit.
    Shutdown,
}

/// Messages a child sends to its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum ChildMsg {
    /// Terminal report of a `Run`.
    Report { id: u64, report: TaskReport },
    /// One synchronization tick: local writes plus known versions.
    Sync {
        writes: Vec<(String, Value)>,
        known: Vec<(String, u64)>,
    },
    /// Log line to surface through the parent's logger.
    Log { level: LogLevel, message: String },
}
