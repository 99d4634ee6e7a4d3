//! Level-tagged logging interface consumed by the runtime.
//!
//! The supervisor never owns a logging framework; it reports through whatever
//! the host provides behind the [`Logger`] trait. [`ConsoleLogger`] is a small
//! built-in sink for demos and tests. Child processes do not log on their own:
//! their lines travel over the wire and come out of the parent's logger.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Log severity, ordered from most verbose to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Host-provided log sink.
///
/// Implementations must tolerate calls from any task or thread.
pub trait Logger: Send + Sync {
    fn log(&self, message: &str, level: LogLevel);
}

/// Shared handle to a logger.
pub type LoggerRef = Arc<dyn Logger>;

/// Minimal logger printing to stderr with a severity floor.
///
/// stderr on purpose: a child process inherits it, while its stdout carries
/// the wire protocol.
pub struct ConsoleLogger {
    min_level: LogLevel,
}

impl ConsoleLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    /// Returns the logger as a shared handle.
    pub fn arc(min_level: LogLevel) -> LoggerRef {
        Arc::new(Self::new(min_level))
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, message: &str, level: LogLevel) {
        if level >= self.min_level {
            eprintln!("[{level}] {message}");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Captures log lines so tests can assert on them.
    #[derive(Default)]
    pub(crate) struct RecordingLogger {
        pub(crate) lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl RecordingLogger {
        pub(crate) fn arc() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn count(&self, level: LogLevel) -> usize {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _)| *l == level)
                .count()
        }

        pub(crate) fn contains(&self, needle: &str) -> bool {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .any(|(_, m)| m.contains(needle))
        }

        pub(crate) fn matching(&self, needle: &str) -> usize {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, m)| m.contains(needle))
                .count()
        }
    }

    impl Logger for RecordingLogger {
        fn log(&self, message: &str, level: LogLevel) {
            self.lines
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        }
    }
}
