//! # brainvisor
//!
//! **Brainvisor** is an embedded task supervisor. An application declares a
//! [`Brain`], registers methods as tasks, and the supervisor assembles,
//! schedules and reports on their execution: one-shot units, refresh-rated
//! routines, wall-clock timeouts, and child-process hosting with a
//! transparently synchronized shared state.
//!
//! ## Features
//!
//! | Area               | Description                                                        | Key types / traits                       |
//! |--------------------|--------------------------------------------------------------------|------------------------------------------|
//! | **Brains**         | Dynamic init from named inputs; shared vs local attribute partition. | [`Brain`], [`Shared`]                   |
//! | **Tasks**          | Declare bodies as closures or trait impls, built through a builder. | [`TaskBuilder`], [`TaskSpec`], [`Task`] |
//! | **Execution**      | One-shot / routine policies, timeouts, cancellation, reports.       | [`BoundTask`], [`TaskReport`]           |
//! | **Child processes**| Re-executed host binary, line-JSON wire, soft + hard deadlines.     | [`child_brain_name`], [`child_main`]    |
//! | **Shared state**   | Versioned store with per-process mirrors and a sync routine.        | [`SharedStore`], [`probe`]              |
//! | **Supervision**    | Run all auto-start tasks, graceful shutdown with grace window.      | [`Supervisor`], [`Config`]              |
//! | **Errors**         | Typed configuration, task and runtime errors.                       | [`ConfigError`], [`TaskError`], [`RuntimeError`] |
//!
//! ```no_run
//! use std::time::Duration;
//! use brainvisor::{Brain, Config, ConsoleLogger, LogLevel, Supervisor, TaskBuilder};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let logger = ConsoleLogger::arc(LogLevel::Debug);
//!     let brain = Brain::new("demo", logger.clone());
//!     brain.input("ticks", 0u64);
//!
//!     // A routine incrementing a shared attribute for half a second.
//!     brain.register(
//!         TaskBuilder::new("tick", false, true)
//!             .refresh_rate(Duration::from_millis(100))
//!             .timeout(Duration::from_millis(500))
//!             .build_async(|ctx| async move {
//!                 let n: u64 = ctx.shared().get("ticks").unwrap_or(0);
//!                 ctx.shared().set("ticks", n + 1);
//!                 Ok(serde_json::json!(n))
//!             })?,
//!     )?;
//!
//!     let sup = Supervisor::new(Config::default(), logger);
//!     let reports = sup.run(&[&brain]).await?;
//!     println!("{reports:?}");
//!     Ok(())
//! }
//! ```
//!
//! Hosting a task in a child process re-executes the current binary; the host
//! checks [`child_brain_name`] first thing in `main` and hands the freshly
//! built Brain to [`child_main`] when it is set.
//!
//! ---

mod alive;
mod brain;
mod child;
mod config;
mod context;
mod error;
mod logger;
mod report;
mod store;
mod supervisor;
mod task;
mod task_spec;
mod wire;
mod worker;
mod wrapper;

// ---- Public re-exports ----

pub use brain::{Brain, BoundTask};
pub use config::Config;
pub use context::TaskContext;
pub use error::{ConfigError, RuntimeError, TaskError};
pub use logger::{ConsoleLogger, LogLevel, Logger, LoggerRef};
pub use report::{ExecutionState, TaskReport};
pub use store::{probe, Shared, SharedStore};
pub use supervisor::Supervisor;
pub use task::{LoopFn, SyncFn, Task, TaskFn, TaskRef, TaskResult};
pub use task_spec::{TaskBuilder, TaskSpec};
pub use worker::{child_brain_name, child_main};
