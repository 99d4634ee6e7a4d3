//! Execution reports returned by bound tasks.
//!
//! Every invocation of a bound task yields exactly one [`TaskReport`]; a
//! routine yields the terminal report of its whole run. Reports cross the
//! process boundary verbatim, so both types are serde-serializable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a single task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Ran to completion within any timeout, no unhandled fault.
    Correctly,
    /// Aborted because the configured timeout elapsed.
    Timeout,
    /// Aborted because the task raised an unhandled fault.
    ErrorOccurred,
}

impl ExecutionState {
    /// Stable numeric code for metrics and log lines.
    pub fn code(&self) -> u8 {
        match self {
            ExecutionState::Correctly => 0,
            ExecutionState::Timeout => 1,
            ExecutionState::ErrorOccurred => 2,
        }
    }
}

/// Record produced by one task invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Name of the task that produced the report.
    pub task_name: String,
    /// Terminal execution state.
    pub status: ExecutionState,
    /// Value returned by the task body, if it completed with one.
    pub result: Option<Value>,
}

impl TaskReport {
    pub(crate) fn correctly(task: &str, result: Option<Value>) -> Self {
        Self {
            task_name: task.to_string(),
            status: ExecutionState::Correctly,
            result,
        }
    }

    pub(crate) fn timeout(task: &str) -> Self {
        Self {
            task_name: task.to_string(),
            status: ExecutionState::Timeout,
            result: None,
        }
    }

    pub(crate) fn error(task: &str) -> Self {
        Self {
            task_name: task.to_string(),
            status: ExecutionState::ErrorOccurred,
            result: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionState::Correctly
    }

    pub fn has_timed_out(&self) -> bool {
        self.status == ExecutionState::Timeout
    }

    pub fn has_crashed(&self) -> bool {
        self.status == ExecutionState::ErrorOccurred
    }
}
