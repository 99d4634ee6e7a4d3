//! Task body abstractions.
//!
//! Main-process bodies implement the async, cancelable [`Task`] trait; the
//! function-backed [`TaskFn`] covers the common closure case and [`TaskRef`]
//! is the shared handle the rest of the runtime works with.
//!
//! Child-process bodies are synchronous by contract (they run on a blocking
//! thread inside the child's trivial loop) and are plain closures: [`SyncFn`]
//! for ordinary bodies, [`LoopFn`] for the looped half of a setup-then-loop
//! task, which additionally receives the environment the setup returned.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::TaskContext;
use crate::error::TaskError;

/// Value produced by one attempt of a task body.
pub type TaskResult = Result<Value, TaskError>;

/// Shared handle to a main-process task body.
pub type TaskRef = Arc<dyn Task>;

/// Synchronous child-process task body.
pub type SyncFn = Arc<dyn Fn(TaskContext) -> TaskResult + Send + Sync>;

/// Looped half of a setup-then-loop body; receives the setup's environment.
pub type LoopFn = Arc<dyn Fn(TaskContext, &Value) -> TaskResult + Send + Sync>;

/// Asynchronous, cancelable unit of work hosted in the main process.
///
/// The body receives a [`TaskContext`] carrying the shared-state handle, the
/// logger and a cancellation token; it should check cancellation at its
/// suspension points and exit promptly during shutdown.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use brainvisor::{Task, TaskContext, TaskResult};
///
/// struct Probe;
///
/// #[async_trait]
/// impl Task for Probe {
///     async fn run(&self, ctx: TaskContext) -> TaskResult {
///         if ctx.is_cancelled() {
///             return Err(brainvisor::TaskError::Canceled);
///         }
///         Ok(serde_json::json!("alive"))
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Executes one attempt of the task until completion or cancellation.
    async fn run(&self, ctx: TaskContext) -> TaskResult;
}

type BoxedBody =
    Box<dyn Fn(TaskContext) -> Pin<Box<dyn Future<Output = TaskResult> + Send>> + Send + Sync>;

/// Function-backed [`Task`] implementation.
///
/// Wraps a `Fn(TaskContext) -> Future`; use [`TaskFn::arc`] when a
/// [`TaskRef`] is needed directly.
pub struct TaskFn {
    func: BoxedBody,
}

impl TaskFn {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            func: Box::new(move |ctx| Box::pin(func(ctx))),
        }
    }

    /// Creates the body and returns it as a shared handle.
    pub fn arc<F, Fut>(func: F) -> TaskRef
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Arc::new(Self::new(func))
    }
}

#[async_trait]
impl Task for TaskFn {
    async fn run(&self, ctx: TaskContext) -> TaskResult {
        (self.func)(ctx).await
    }
}
