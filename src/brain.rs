//! The Brain: a user application object whose tasks the supervisor runs.
//!
//! Construction is the dynamic initializer: named inputs land as attributes,
//! each probed for the shared store; values that fail the probe stay local to
//! the main process. Registered task specs bind to the Brain immediately and
//! are retrievable by name; [`Brain::get_tasks`] yields the auto-start set in
//! declaration order, each a zero-argument callable returning an execution
//! report.
//!
//! The sharing partition is explicit: [`Brain::input`] attributes are
//! shared-store candidates, [`Brain::local`] attributes never leave the main
//! process. Child processes see shared attributes through their mirror and
//! see locals as absent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::child::ChildLink;
use crate::config::Config;
use crate::context::{Locals, TaskContext};
use crate::error::{ConfigError, RuntimeError};
use crate::logger::{LogLevel, LoggerRef};
use crate::report::TaskReport;
use crate::store::{probe, probe_warning, Mirror, Shared, SharedStore};
use crate::task_spec::{TaskBody, TaskSpec};
use crate::wrapper;

/// User-facing handle to a Brain instance.
#[derive(Clone)]
pub struct Brain {
    inner: Arc<BrainInner>,
}

pub(crate) struct BrainInner {
    pub(crate) name: String,
    pub(crate) logger: LoggerRef,
    pub(crate) cfg: Config,
    pub(crate) store: SharedStore,
    pub(crate) mirror: Arc<Mutex<Mirror>>,
    locals: Locals,
    tasks: RwLock<Vec<Arc<TaskSpec>>>,
    child: tokio::sync::Mutex<Option<ChildLink>>,
    root: CancellationToken,
    sync_started: AtomicBool,
}

impl Drop for BrainInner {
    fn drop(&mut self) {
        // Stops the sync routine and any outstanding bound-task tokens.
        self.root.cancel();
    }
}

impl Brain {
    pub fn new(name: impl Into<String>, logger: LoggerRef) -> Self {
        Self::with_config(name, logger, Config::default())
    }

    pub fn with_config(name: impl Into<String>, logger: LoggerRef, cfg: Config) -> Self {
        Self {
            inner: Arc::new(BrainInner {
                name: name.into(),
                logger,
                cfg,
                store: SharedStore::new(),
                mirror: Arc::new(Mutex::new(Mirror::default())),
                locals: Arc::new(RwLock::new(HashMap::new())),
                tasks: RwLock::new(Vec::new()),
                child: tokio::sync::Mutex::new(None),
                root: CancellationToken::new(),
                sync_started: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn logger(&self) -> &LoggerRef {
        &self.inner.logger
    }

    /// Handle to the Brain's shared attributes, as tasks see them.
    pub fn shared(&self) -> Shared {
        Shared::new(self.inner.mirror.clone(), self.inner.logger.clone())
    }

    /// Declares a named constructor input.
    ///
    /// The value is probed for the shared store: on success it becomes a
    /// shared attribute visible to every process; on failure it is logged and
    /// retained only in the main process (readable via [`Brain::local_get`]
    /// and `TaskContext::local`). Names starting with `_` stay local to the
    /// mirror regardless.
    pub fn input<T>(&self, name: &str, value: T) -> &Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        match probe(&value) {
            Ok(json) => {
                if let Ok(mut mirror) = self.inner.mirror.lock() {
                    if name.starts_with('_') {
                        mirror.write(name, json);
                    } else {
                        let version = self.inner.store.put(name, json.clone());
                        mirror.seed_one(name, json, version);
                    }
                }
            }
            Err(_) => {
                probe_warning(&self.inner.logger, name);
                if let Ok(mut locals) = self.inner.locals.write() {
                    locals.insert(name.to_string(), Box::new(value));
                }
            }
        }
        self
    }

    /// Declares a deliberately process-local attribute (never probed, never
    /// shared).
    pub fn local<T: Send + Sync + 'static>(&self, name: &str, value: T) -> &Self {
        if let Ok(mut locals) = self.inner.locals.write() {
            locals.insert(name.to_string(), Box::new(value));
        }
        self
    }

    /// Reads a process-local attribute back.
    pub fn local_get<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Option<T> {
        let locals = self.inner.locals.read().ok()?;
        locals.get(name)?.downcast_ref::<T>().cloned()
    }

    /// Registers a task spec, binding it to this Brain.
    ///
    /// Declaration order is preserved; duplicate names are a configuration
    /// fault.
    pub fn register(&self, spec: TaskSpec) -> Result<(), ConfigError> {
        let mut tasks = match self.inner.tasks.write() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if tasks.iter().any(|t| t.name == spec.name) {
            return Err(ConfigError::DuplicateTask { task: spec.name });
        }
        tasks.push(Arc::new(spec));
        Ok(())
    }

    /// All bound tasks, in declaration order.
    pub fn tasks(&self) -> Vec<BoundTask> {
        self.inner
            .catalog()
            .into_iter()
            .map(|spec| BoundTask {
                spec,
                brain: self.inner.clone(),
            })
            .collect()
    }

    /// The `run_on_start` subset, in declaration order.
    pub fn autostart_tasks(&self) -> Vec<BoundTask> {
        self.tasks()
            .into_iter()
            .filter(|t| t.spec.run_on_start)
            .collect()
    }

    /// Auto-start tasks as the host awaits them; alias of
    /// [`Brain::autostart_tasks`].
    pub fn get_tasks(&self) -> Vec<BoundTask> {
        self.autostart_tasks()
    }

    /// Looks up a bound task by name.
    pub fn task(&self, name: &str) -> Option<BoundTask> {
        self.tasks().into_iter().find(|t| t.name() == name)
    }

    /// Cancels all in-flight bound tasks and tears the child process down.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        let link = self.inner.child.lock().await.take();
        if let Some(link) = link {
            link.shutdown(self.inner.cfg.child_kill_grace).await;
        }
    }

    pub(crate) fn inner(&self) -> &Arc<BrainInner> {
        &self.inner
    }

    #[cfg(test)]
    pub(crate) async fn attach_child_link(&self, link: ChildLink) {
        self.inner.start_sync_routine();
        *self.inner.child.lock().await = Some(link);
    }
}

impl BrainInner {
    pub(crate) fn catalog(&self) -> Vec<Arc<TaskSpec>> {
        match self.tasks.read() {
            Ok(g) => g.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    fn context(&self, task: &str, cancel: CancellationToken) -> TaskContext {
        TaskContext {
            task: Arc::from(task),
            shared: Shared::new(self.mirror.clone(), self.logger.clone()),
            logger: self.logger.clone(),
            cancel,
            locals: Some(self.locals.clone()),
        }
    }

    /// Starts the main-process mirror <-> store synchronization routine.
    ///
    /// Runs once per Brain, from the first child-process task; ends when the
    /// Brain shuts down or is dropped.
    fn start_sync_routine(&self) {
        if self.sync_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mirror = self.mirror.clone();
        let store = self.store.clone();
        let rate = self.cfg.sync_rate;
        let root = self.root.clone();
        tokio::spawn(async move {
            loop {
                let sleep = time::sleep(rate);
                tokio::pin!(sleep);
                tokio::select! {
                    _ = &mut sleep => {}
                    _ = root.cancelled() => break,
                }
                if let Ok(mut m) = mirror.lock() {
                    m.flush_to(&store);
                    m.pull_from(&store);
                }
            }
        });
    }

    /// Spawns (or respawns) the child process behind the slot.
    async fn ensure_child(&self, slot: &mut Option<ChildLink>) -> Result<(), RuntimeError> {
        let dead = slot.as_ref().map(|l| !l.is_alive()).unwrap_or(true);
        if !dead {
            return Ok(());
        }
        if slot.take().is_some() {
            self.logger.log(
                &format!("[{}] child process -> respawning", self.name),
                LogLevel::Warning,
            );
        }
        let link = ChildLink::spawn(&self.name, self.store.clone(), self.logger.clone())?;
        link.seed(&self.store).await?;
        self.logger.log(
            &format!("[{}] child process -> spawned", self.name),
            LogLevel::Debug,
        );
        *slot = Some(link);
        Ok(())
    }

    /// Policy C: dispatch one task to the Brain's child process.
    async fn run_in_child(&self, spec: &Arc<TaskSpec>, cancel: CancellationToken) -> TaskReport {
        self.start_sync_routine();

        let (call_id, rx) = {
            let mut slot = self.child.lock().await;
            if let Err(e) = self.ensure_child(&mut slot).await {
                self.logger.log(
                    &format!("[{}] transport -> cannot reach child process: {e}", spec.name),
                    LogLevel::Error,
                );
                return TaskReport::error(&spec.name);
            }
            let link = match slot.as_ref() {
                Some(l) => l,
                None => return TaskReport::error(&spec.name),
            };
            match link.call(&spec.name).await {
                Ok(pair) => pair,
                Err(e) => {
                    self.logger.log(
                        &format!("[{}] transport -> child process unavailable: {e}", spec.name),
                        LogLevel::Error,
                    );
                    return TaskReport::error(&spec.name);
                }
            }
        };

        // Soft deadlines live in the child; this is the hard one.
        let hard = spec.timeout.map(|t| t + self.cfg.child_kill_grace);

        tokio::select! {
            _ = cancel.cancelled() => {
                // Shutdown: abandon the in-flight run, asking the child to
                // stop its current iteration.
                if let Some(link) = self.child.lock().await.as_ref() {
                    link.cancel(call_id).await;
                }
                TaskReport::correctly(&spec.name, None)
            }
            out = async {
                match hard {
                    Some(h) => time::timeout(h, rx).await,
                    None => Ok(rx.await),
                }
            } => match out {
                Ok(Ok(report)) => report,
                Ok(Err(_dropped)) => {
                    self.logger.log(
                        &format!("[{}] transport -> child process unavailable", spec.name),
                        LogLevel::Error,
                    );
                    TaskReport::error(&spec.name)
                }
                Err(_elapsed) => {
                    self.logger.log(
                        &format!(
                            "[{}] child process overran its deadline, killing it",
                            spec.name
                        ),
                        LogLevel::Warning,
                    );
                    if let Some(link) = self.child.lock().await.as_ref() {
                        link.kill();
                    }
                    TaskReport::timeout(&spec.name)
                }
            },
        }
    }
}

/// A task spec bound to its Brain; calling it yields an execution report.
#[derive(Clone)]
pub struct BoundTask {
    spec: Arc<TaskSpec>,
    brain: Arc<BrainInner>,
}

impl BoundTask {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    /// Runs the task to completion under the Brain's root token.
    pub async fn run(&self) -> TaskReport {
        self.run_with_token(self.brain.root.child_token()).await
    }

    pub(crate) async fn run_with_token(&self, cancel: CancellationToken) -> TaskReport {
        if self.spec.process {
            return self.brain.run_in_child(&self.spec, cancel).await;
        }
        let ctx = self.brain.context(&self.spec.name, cancel);
        match (&self.spec.body, self.spec.refresh_rate) {
            (TaskBody::Main(task), None) => {
                wrapper::one_shot(&ctx, task.as_ref(), self.spec.timeout).await
            }
            (TaskBody::Main(task), Some(rate)) => {
                wrapper::routine(&ctx, task.as_ref(), rate, self.spec.timeout).await
            }
            // Child bodies carry process = true; the builder forbids this.
            _ => TaskReport::error(&self.spec.name),
        }
    }
}
