//! Task descriptors and their builder.
//!
//! A [`TaskSpec`] is the immutable record attached to a task at declaration
//! time: where it runs (`process`), whether it belongs to the auto-start set,
//! its refresh rate (presence makes it a routine), its timeout, and the body.
//! Specs are built through [`TaskBuilder`], which enforces the descriptor
//! invariants and rejects invalid combinations at build time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::context::TaskContext;
use crate::error::ConfigError;
use crate::task::{LoopFn, SyncFn, TaskFn, TaskRef, TaskResult};

/// Executable payload of a task.
pub(crate) enum TaskBody {
    /// Cooperative body scheduled on the main-process runtime.
    Main(TaskRef),
    /// Synchronous body executed inside the Brain's child process.
    Child(SyncFn),
    /// Setup-then-loop form: run `setup` once, then loop `body` over the
    /// environment the setup returned.
    SetupLoop { setup: SyncFn, body: LoopFn },
}

impl fmt::Debug for TaskBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            TaskBody::Main(_) => "main",
            TaskBody::Child(_) => "child",
            TaskBody::SetupLoop { .. } => "setup_loop",
        };
        f.write_str(kind)
    }
}

/// Immutable descriptor of a registered task.
pub struct TaskSpec {
    pub(crate) name: String,
    pub(crate) process: bool,
    pub(crate) run_on_start: bool,
    pub(crate) refresh_rate: Option<Duration>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) body: TaskBody,
}

impl TaskSpec {
    /// Starts a builder; `process` and `run_on_start` are always required.
    pub fn builder(name: impl Into<String>, process: bool, run_on_start: bool) -> TaskBuilder {
        TaskBuilder::new(name, process, run_on_start)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> bool {
        self.process
    }

    pub fn run_on_start(&self) -> bool {
        self.run_on_start
    }

    pub fn refresh_rate(&self) -> Option<Duration> {
        self.refresh_rate
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// A task with a refresh rate is a routine; without one, a one-shot.
    pub fn is_routine(&self) -> bool {
        self.refresh_rate.is_some()
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("process", &self.process)
            .field("run_on_start", &self.run_on_start)
            .field("refresh_rate", &self.refresh_rate)
            .field("timeout", &self.timeout)
            .field("body", &self.body)
            .finish()
    }
}

/// Builder for [`TaskSpec`] with a fluent API.
///
/// The terminal `build_*` methods pick the body flavor and validate the
/// descriptor as a whole.
#[derive(Clone)]
pub struct TaskBuilder {
    name: String,
    process: bool,
    run_on_start: bool,
    refresh_rate: Option<Duration>,
    timeout: Option<Duration>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>, process: bool, run_on_start: bool) -> Self {
        Self {
            name: name.into(),
            process,
            run_on_start,
            refresh_rate: None,
            timeout: None,
        }
    }

    /// Marks the task as a routine iterating every `rate`.
    pub fn refresh_rate(mut self, rate: Duration) -> Self {
        self.refresh_rate = Some(rate);
        self
    }

    /// Bounds the task's total wall-clock time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if matches!(self.refresh_rate, Some(r) if r.is_zero()) {
            return Err(ConfigError::ZeroRefreshRate {
                task: self.name.clone(),
            });
        }
        Ok(())
    }

    fn finish(self, body: TaskBody) -> TaskSpec {
        TaskSpec {
            name: self.name,
            process: self.process,
            run_on_start: self.run_on_start,
            refresh_rate: self.refresh_rate,
            timeout: self.timeout,
            body,
        }
    }

    /// Builds a main-process task from an async closure.
    pub fn build_async<F, Fut>(self, f: F) -> Result<TaskSpec, ConfigError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.build_from_task(TaskFn::arc(f))
    }

    /// Builds a main-process task from an existing [`TaskRef`].
    pub fn build_from_task(self, task: TaskRef) -> Result<TaskSpec, ConfigError> {
        self.validate()?;
        if self.process {
            return Err(ConfigError::AsyncBodyInChildProcess { task: self.name });
        }
        Ok(self.finish(TaskBody::Main(task)))
    }

    /// Builds a child-process task from a synchronous closure.
    pub fn build_sync<F>(self, f: F) -> Result<TaskSpec, ConfigError>
    where
        F: Fn(TaskContext) -> TaskResult + Send + Sync + 'static,
    {
        self.validate()?;
        if !self.process {
            return Err(ConfigError::SyncBodyInMainProcess { task: self.name });
        }
        Ok(self.finish(TaskBody::Child(Arc::new(f))))
    }

    /// Builds the setup-then-loop form: `setup` runs once and returns the
    /// loop's environment; `body` then iterates at the refresh rate with that
    /// environment in scope. Child-process routines only.
    pub fn build_setup_loop<S, L>(self, setup: S, body: L) -> Result<TaskSpec, ConfigError>
    where
        S: Fn(TaskContext) -> TaskResult + Send + Sync + 'static,
        L: Fn(TaskContext, &Value) -> TaskResult + Send + Sync + 'static,
    {
        self.validate()?;
        if !self.process {
            return Err(ConfigError::SyncBodyInMainProcess { task: self.name });
        }
        if self.refresh_rate.is_none() {
            return Err(ConfigError::SetupLoopWithoutRefreshRate { task: self.name });
        }
        Ok(self.finish(TaskBody::SetupLoop {
            setup: Arc::new(setup),
            body: Arc::new(body),
        }))
    }
}
