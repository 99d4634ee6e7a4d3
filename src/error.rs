//! Error types used by the brainvisor runtime and tasks.
//!
//! Three enums, by blast radius:
//!
//! - [`ConfigError`]: descriptor invariants violated at build/registration
//!   time. Fatal, surfaced immediately to the host.
//! - [`TaskError`]: failures of a single task attempt. Caught at the wrapper
//!   boundary, logged, folded into an execution report; never propagated to
//!   sibling tasks.
//! - [`RuntimeError`]: failures of the runtime itself (shutdown grace,
//!   child-process plumbing).

use std::time::Duration;

use thiserror::Error;

/// Descriptor invariant violations detected at build or registration time.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A refresh rate must be strictly greater than zero.
    #[error("task '{task}': refresh rate must be strictly positive")]
    ZeroRefreshRate { task: String },

    /// The setup-then-loop form only makes sense for a routine.
    #[error("task '{task}': setup-then-loop requires a refresh rate")]
    SetupLoopWithoutRefreshRate { task: String },

    /// Asynchronous bodies are cooperative and belong to the main process.
    #[error("task '{task}': asynchronous bodies run in the main process only")]
    AsyncBodyInChildProcess { task: String },

    /// Synchronous bodies would starve the main-process scheduler.
    #[error("task '{task}': synchronous bodies run in a child process only")]
    SyncBodyInMainProcess { task: String },

    /// Task names are unique per Brain.
    #[error("task '{task}' is already registered")]
    DuplicateTask { task: String },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::ZeroRefreshRate { .. } => "config_zero_refresh_rate",
            ConfigError::SetupLoopWithoutRefreshRate { .. } => "config_setup_loop_no_refresh",
            ConfigError::AsyncBodyInChildProcess { .. } => "config_async_body_in_child",
            ConfigError::SyncBodyInMainProcess { .. } => "config_sync_body_in_main",
            ConfigError::DuplicateTask { .. } => "config_duplicate_task",
        }
    }
}

/// Errors produced by a single task attempt.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// The attempt exceeded its wall-clock budget.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The user code raised an unhandled fault.
    #[error("execution failed: {reason}")]
    Fail { reason: String },

    /// The attempt was canceled by shutdown or parent cancellation.
    ///
    /// Not an error in the traditional sense; signals intentional termination.
    #[error("context canceled")]
    Canceled,

    /// The cross-process request could not be delivered.
    #[error("transport failure: {reason}")]
    Transport { reason: String },
}

impl TaskError {
    /// Shorthand for a user fault with a formatted reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        TaskError::Fail {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
            TaskError::Transport { .. } => "task_transport",
        }
    }

    /// Whether a routine may keep iterating after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. })
    }
}

/// Errors produced by the runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period elapsed with tasks still running.
    #[error("shutdown grace {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of tasks that did not stop in time.
        stuck: Vec<String>,
    },

    /// The child process could not be spawned.
    #[error("failed to spawn child process: {0}")]
    ChildSpawn(#[from] std::io::Error),

    /// The wire to a child process failed.
    #[error("child process i/o: {reason}")]
    ChildIo { reason: String },

    /// `child_main` was invoked in a process that is not a spawned child.
    #[error("not running as a brain child process")]
    NotAChildProcess,
}

impl RuntimeError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::ChildSpawn(_) => "runtime_child_spawn",
            RuntimeError::ChildIo { .. } => "runtime_child_io",
            RuntimeError::NotAChildProcess => "runtime_not_a_child",
        }
    }
}
