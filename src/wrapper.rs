//! Main-process execution policies.
//!
//! Drives one-shot and routine runs of a cooperative [`Task`] body with
//! cancellation and an optional wall-clock budget:
//!
//! - a one-shot runs the body once; the report carries the returned value;
//! - a routine iterates until its budget is exhausted, sleeping the refresh
//!   rate between iterations; each iteration runs with the *remaining* budget
//!   as its own timeout, and an iteration fault never stops the routine.
//!
//! Cancellation by shutdown yields `correctly` with the in-flight attempt
//! abandoned; cancellation by deadline yields `timeout`.

use std::time::Duration;

use tokio::time::{self, Instant};

use crate::context::TaskContext;
use crate::error::TaskError;
use crate::logger::LogLevel;
use crate::report::TaskReport;
use crate::task::{Task, TaskResult};

/// Outcome of a single attempt, after fault handling.
pub(crate) enum Attempt {
    Done(serde_json::Value),
    Fault,
    TimedOut,
    Canceled,
}

pub(crate) fn fold_result(ctx: &TaskContext, scope: &str, res: TaskResult) -> Attempt {
    match res {
        Ok(value) => Attempt::Done(value),
        Err(TaskError::Canceled) => Attempt::Canceled,
        Err(TaskError::Timeout { .. }) => Attempt::TimedOut,
        Err(e) => {
            ctx.log(
                &format!("[{}] executor ({scope}) -> error: {e}", ctx.name()),
                LogLevel::Error,
            );
            Attempt::Fault
        }
    }
}

/// Runs the body once under the given budget, honoring cancellation.
async fn attempt(ctx: &TaskContext, task: &dyn Task, budget: Option<Duration>) -> Attempt {
    let run = task.run(ctx.clone());
    tokio::select! {
        _ = ctx.cancel.cancelled() => Attempt::Canceled,
        out = async {
            match budget.filter(|d| !d.is_zero()) {
                Some(d) => match time::timeout(d, run).await {
                    Ok(res) => fold_result(ctx, "main process", res),
                    Err(_elapsed) => Attempt::TimedOut,
                },
                None => fold_result(ctx, "main process", run.await),
            }
        } => out,
    }
}

/// Policy A: one-shot, main process.
pub(crate) async fn one_shot(
    ctx: &TaskContext,
    task: &dyn Task,
    timeout: Option<Duration>,
) -> TaskReport {
    let name = ctx.name().to_string();
    ctx.log(
        &format!("[{name}] one-shot (main process) -> started"),
        LogLevel::Info,
    );
    match attempt(ctx, task, timeout).await {
        Attempt::Done(value) => {
            ctx.log(
                &format!("[{name}] one-shot (main process) -> ended, output [{value}]"),
                LogLevel::Info,
            );
            TaskReport::correctly(&name, Some(value))
        }
        Attempt::TimedOut => {
            ctx.log(
                &format!(
                    "[{name}] one-shot (main process) -> ended by reaching the timeout [{timeout:?}]"
                ),
                LogLevel::Info,
            );
            TaskReport::timeout(&name)
        }
        Attempt::Fault => TaskReport::error(&name),
        Attempt::Canceled => TaskReport::correctly(&name, None),
    }
}

/// Policy B: routine, main process.
pub(crate) async fn routine(
    ctx: &TaskContext,
    task: &dyn Task,
    refresh: Duration,
    timeout: Option<Duration>,
) -> TaskReport {
    let name = ctx.name().to_string();
    ctx.log(
        &format!("[{name}] routine (main process) -> started"),
        LogLevel::Info,
    );
    let started = Instant::now();

    loop {
        let budget = match timeout {
            Some(t) => {
                let left = t.saturating_sub(started.elapsed());
                if left.is_zero() {
                    ctx.log(
                        &format!(
                            "[{name}] routine (main process) -> ended by reaching the timeout [{t:?}]"
                        ),
                        LogLevel::Info,
                    );
                    return TaskReport::timeout(&name);
                }
                Some(left)
            }
            None => None,
        };

        match attempt(ctx, task, budget).await {
            Attempt::Done(_) => {
                ctx.log(
                    &format!("[{name}] routine (main process) -> iteration ok"),
                    LogLevel::Info,
                );
            }
            // Already logged at ERROR; the routine keeps going.
            Attempt::Fault => {}
            Attempt::TimedOut if timeout.is_some() => {
                ctx.log(
                    &format!(
                        "[{name}] routine (main process) -> ended by reaching the timeout [{timeout:?}]"
                    ),
                    LogLevel::Info,
                );
                return TaskReport::timeout(&name);
            }
            // A stray timeout error without a configured budget counts as an
            // iteration fault.
            Attempt::TimedOut => {}
            Attempt::Canceled => return TaskReport::correctly(&name, None),
        }

        let sleep = time::sleep(refresh);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => {}
            _ = ctx.cancel.cancelled() => return TaskReport::correctly(&name, None),
        }
    }
}
