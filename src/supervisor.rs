//! Supervisor runtime.
//!
//! Collects the auto-start tasks of every registered Brain, runs them
//! concurrently on a [`JoinSet`], and returns the aggregate execution
//! reports. On a termination signal it cancels main-process tasks
//! cooperatively, tears child processes down, and waits up to the configured
//! grace; whoever is still alive past the grace is reported as stuck.

use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::alive::AliveTracker;
use crate::brain::Brain;
use crate::config::Config;
use crate::error::RuntimeError;
use crate::logger::{LogLevel, LoggerRef};
use crate::report::TaskReport;

pub struct Supervisor {
    pub cfg: Config,
    logger: LoggerRef,
}

impl Supervisor {
    pub fn new(cfg: Config, logger: LoggerRef) -> Self {
        Self { cfg, logger }
    }

    /// Runs every Brain's auto-start tasks to completion (or until a
    /// termination signal) and returns their reports.
    ///
    /// Reports arrive in completion order; tasks started together are not
    /// ordered relative to each other.
    pub async fn run(&self, brains: &[&Brain]) -> Result<Vec<TaskReport>, RuntimeError> {
        let runtime_token = CancellationToken::new();
        let alive = AliveTracker::default();
        let mut set: JoinSet<TaskReport> = JoinSet::new();

        for brain in brains {
            for task in brain.autostart_tasks() {
                let token = runtime_token.child_token();
                let tracker = alive.clone();
                tracker.insert(task.name());
                set.spawn(async move {
                    let report = task.run_with_token(token).await;
                    tracker.remove(&report.task_name);
                    report
                });
            }
        }
        if set.is_empty() {
            return Ok(Vec::new());
        }

        let mut reports = Vec::new();
        let signal = wait_for_shutdown_signal();
        tokio::pin!(signal);

        let finished = loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok(report)) => reports.push(report),
                    Some(Err(_panicked)) => {}
                    None => break true,
                },
                _ = &mut signal => break false,
            }
        };
        if finished {
            return Ok(reports);
        }

        self.logger
            .log("[supervisor] shutdown requested", LogLevel::Info);
        runtime_token.cancel();
        for brain in brains {
            brain.shutdown().await;
        }

        let deadline = time::sleep(self.cfg.grace);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = set.join_next() => match joined {
                    Some(Ok(report)) => reports.push(report),
                    Some(Err(_panicked)) => {}
                    None => {
                        self.logger
                            .log("[supervisor] all tasks stopped within grace", LogLevel::Info);
                        return Ok(reports);
                    }
                },
                _ = &mut deadline => {
                    set.abort_all();
                    return Err(RuntimeError::GraceExceeded {
                        grace: self.cfg.grace,
                        stuck: alive.snapshot(),
                    });
                }
            }
        }
    }
}

/// Completes when the process receives a termination signal.
///
/// Unix: SIGINT, SIGTERM, or ctrl-c; elsewhere only ctrl-c.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(_) => return std::future::pending().await,
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => return std::future::pending().await,
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
