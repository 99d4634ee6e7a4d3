//! Global runtime configuration.
//!
//! [`Config`] controls the supervisor's shutdown behavior and the pacing of
//! the shared-state synchronization routine.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use brainvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.grace = Duration::from_secs(10);
//! cfg.sync_rate = Duration::from_millis(5);
//!
//! assert_eq!(cfg.sync_rate, Duration::from_millis(5));
//! ```

use std::time::Duration;

/// Configuration for the supervisor runtime and per-Brain plumbing.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Maximum time to wait for graceful shutdown before force-terminating.
    pub grace: Duration,
    /// Interval of the mirror <-> store synchronization routine.
    pub sync_rate: Duration,
    /// Extra slack granted to a child process past a task's timeout before
    /// the parent kills it.
    pub child_kill_grace: Duration,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `grace = 30s`
    /// - `sync_rate = 10ms`
    /// - `child_kill_grace = 500ms`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            sync_rate: Duration::from_millis(10),
            child_kill_grace: Duration::from_millis(500),
        }
    }
}
