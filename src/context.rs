//! Per-invocation context handed to every task body.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::logger::{LogLevel, LoggerRef};
use crate::store::Shared;

/// Process-local opaque attributes (values that failed the serializer probe
/// or were declared local on purpose). Main process only.
pub(crate) type Locals = Arc<RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>>;

/// Execution context of one task invocation.
///
/// Cheap to clone; every clone observes the same shared state and the same
/// cancellation token.
#[derive(Clone)]
pub struct TaskContext {
    pub(crate) task: Arc<str>,
    pub(crate) shared: Shared,
    pub(crate) logger: LoggerRef,
    pub(crate) cancel: CancellationToken,
    pub(crate) locals: Option<Locals>,
}

impl TaskContext {
    /// Name of the task this context belongs to.
    pub fn name(&self) -> &str {
        &self.task
    }

    /// Handle to the Brain's shared attributes.
    pub fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Logs through the Brain's logger (forwarded to the parent process when
    /// running inside a child).
    pub fn log(&self, message: &str, level: LogLevel) {
        self.logger.log(message, level);
    }

    /// Whether shutdown or a deadline asked this task to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspends until the task is asked to stop.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Reads a process-local attribute of the Brain.
    ///
    /// Returns `None` when the attribute does not exist. Inside a child
    /// process locals are always absent.
    pub fn local<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Option<T> {
        let locals = self.locals.as_ref()?;
        let guard = locals.read().ok()?;
        guard.get(name)?.downcast_ref::<T>().cloned()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::logger::test_support::RecordingLogger;
    use crate::store::Mirror;
    use std::sync::Mutex;

    /// Builds a bare context plus its recording logger, for policy tests.
    pub(crate) fn recording_ctx(task: &str) -> (TaskContext, Arc<RecordingLogger>) {
        let logger = RecordingLogger::arc();
        let logger_ref: LoggerRef = logger.clone();
        let mirror = Arc::new(Mutex::new(Mirror::default()));
        let ctx = TaskContext {
            task: Arc::from(task),
            shared: Shared::new(mirror, logger_ref.clone()),
            logger: logger_ref,
            cancel: CancellationToken::new(),
            locals: None,
        };
        (ctx, logger)
    }
}
