//! Child-process side of the runtime.
//!
//! A child is the host binary re-executed with `BRAINVISOR_CHILD` set. The
//! host builds its Brain exactly as in the parent, then hands it to
//! [`child_main`], which serves the trivial worker loop: requests execute
//! one at a time on a blocking thread, while a sync ticker reconciles the
//! local mirror with the parent's store and log lines ride the wire back.
//!
//! Deadlines in here are soft: an expired budget cancels the task's token and
//! reports `timeout`, leaving a non-cooperating thread to linger. The hard
//! deadline is the parent's: it kills the whole process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::brain::Brain;
use crate::context::TaskContext;
use crate::error::RuntimeError;
use crate::logger::{LogLevel, Logger, LoggerRef};
use crate::report::TaskReport;
use crate::store::{Mirror, Shared};
use crate::task::{LoopFn, SyncFn, TaskResult};
use crate::task_spec::{TaskBody, TaskSpec};
use crate::wire::{ChildMsg, ParentMsg, StoreEntry};
use crate::wrapper::{fold_result, Attempt};

/// Environment variable marking a process as a Brain child worker.
pub(crate) const CHILD_ENV: &str = "BRAINVISOR_CHILD";

/// Name of the Brain this process was spawned for, if it is a child worker.
///
/// The host checks this early in `main`: when set, build the named Brain and
/// call [`child_main`] instead of starting the supervisor.
pub fn child_brain_name() -> Option<String> {
    std::env::var(CHILD_ENV).ok()
}

/// Serves the worker loop over stdin/stdout until the parent says otherwise.
pub async fn child_main(brain: Brain) -> Result<(), RuntimeError> {
    if child_brain_name().is_none() {
        return Err(RuntimeError::NotAChildProcess);
    }
    serve(brain, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Forwards log lines to the parent process.
struct WireLogger {
    tx: mpsc::UnboundedSender<ChildMsg>,
}

impl Logger for WireLogger {
    fn log(&self, message: &str, level: LogLevel) {
        let _ = self.tx.send(ChildMsg::Log {
            level,
            message: message.to_string(),
        });
    }
}

/// Worker loop over an arbitrary transport (stdio in production, an
/// in-memory duplex in tests).
pub(crate) async fn serve<R, W>(brain: Brain, reader: R, writer: W) -> Result<(), RuntimeError>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let inner = brain.inner().clone();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ChildMsg>();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(msg) = out_rx.recv().await {
            let line = match serde_json::to_string(&msg) {
                Ok(l) => l,
                Err(_) => continue,
            };
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    let wire_logger: LoggerRef = Arc::new(WireLogger { tx: out_tx.clone() });
    let shared = Shared::new(inner.mirror.clone(), wire_logger.clone());
    let root = CancellationToken::new();
    let current: Arc<Mutex<Option<(u64, CancellationToken)>>> = Arc::new(Mutex::new(None));

    let catalog: HashMap<String, Arc<TaskSpec>> = inner
        .catalog()
        .into_iter()
        .map(|spec| (spec.name.clone(), spec))
        .collect();

    let (run_tx, run_rx) = mpsc::unbounded_channel::<(u64, Arc<TaskSpec>)>();
    let runner = tokio::spawn(run_loop(
        run_rx,
        out_tx.clone(),
        shared.clone(),
        wire_logger.clone(),
        root.clone(),
        current.clone(),
    ));
    let ticker = tokio::spawn(sync_ticker(
        inner.mirror.clone(),
        out_tx.clone(),
        inner.cfg.sync_rate,
        root.clone(),
    ));

    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            // EOF or a broken pipe both mean the parent is gone.
            Ok(None) | Err(_) => break,
        };
        let msg = match serde_json::from_str::<ParentMsg>(&line) {
            Ok(m) => m,
            Err(_) => continue,
        };
        match msg {
            ParentMsg::Seed { entries } => {
                if let Ok(mut m) = inner.mirror.lock() {
                    m.seed(StoreEntry::into_tuples(entries));
                }
            }
            ParentMsg::Run { id, task } => match catalog.get(&task) {
                Some(spec) => {
                    let _ = run_tx.send((id, spec.clone()));
                }
                None => {
                    let _ = out_tx.send(ChildMsg::Report {
                        id,
                        report: TaskReport::error(&task),
                    });
                }
            },
            ParentMsg::Cancel { id } => {
                let guard = current.lock().unwrap_or_else(|p| p.into_inner());
                if let Some((running, token)) = guard.as_ref() {
                    if *running == id {
                        token.cancel();
                    }
                }
            }
            ParentMsg::SyncReply { updates } => {
                if let Ok(mut m) = inner.mirror.lock() {
                    m.apply_updates(StoreEntry::into_tuples(updates));
                }
            }
            ParentMsg::Shutdown => break,
        }
    }

    root.cancel();
    drop(run_tx);
    let _ = runner.await;
    ticker.abort();
    drop(shared);
    drop(wire_logger);
    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

/// Executes queued runs one at a time, in request order.
async fn run_loop(
    mut run_rx: mpsc::UnboundedReceiver<(u64, Arc<TaskSpec>)>,
    out_tx: mpsc::UnboundedSender<ChildMsg>,
    shared: Shared,
    logger: LoggerRef,
    root: CancellationToken,
    current: Arc<Mutex<Option<(u64, CancellationToken)>>>,
) {
    while let Some((id, spec)) = run_rx.recv().await {
        let token = root.child_token();
        *current.lock().unwrap_or_else(|p| p.into_inner()) = Some((id, token.clone()));

        let ctx = TaskContext {
            task: Arc::from(spec.name.as_str()),
            shared: shared.clone(),
            logger: logger.clone(),
            cancel: token,
            locals: None,
        };
        let report = execute(&ctx, &spec).await;

        *current.lock().unwrap_or_else(|p| p.into_inner()) = None;
        let _ = out_tx.send(ChildMsg::Report { id, report });
    }
}

async fn execute(ctx: &TaskContext, spec: &TaskSpec) -> TaskReport {
    match (&spec.body, spec.refresh_rate) {
        (TaskBody::Child(f), None) => one_shot_sync(ctx, f, spec.timeout).await,
        (TaskBody::Child(f), Some(rate)) => {
            routine_sync(
                ctx,
                &Runnable::Plain(f.clone()),
                rate,
                spec.timeout,
                Instant::now(),
            )
            .await
        }
        (TaskBody::SetupLoop { setup, body }, Some(rate)) => {
            setup_then_loop(ctx, setup, body, rate, spec.timeout).await
        }
        // Main-process bodies never reach a child; the builder forbids it.
        _ => TaskReport::error(&spec.name),
    }
}

/// Mirror <-> store reconciliation at the configured rate, over the wire.
async fn sync_ticker(
    mirror: Arc<Mutex<Mirror>>,
    tx: mpsc::UnboundedSender<ChildMsg>,
    rate: Duration,
    root: CancellationToken,
) {
    loop {
        let sleep = time::sleep(rate);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => {}
            _ = root.cancelled() => break,
        }
        let (writes, known) = match mirror.lock() {
            Ok(mut m) => (
                m.take_writes(),
                m.known_versions().into_iter().collect::<Vec<_>>(),
            ),
            Err(_) => continue,
        };
        if tx.send(ChildMsg::Sync { writes, known }).is_err() {
            break;
        }
    }
}

/// A synchronous body, with or without a setup environment.
enum Runnable {
    Plain(SyncFn),
    Env(LoopFn, Arc<Value>),
}

impl Runnable {
    /// Runs one attempt on a blocking thread under the given budget.
    async fn attempt(&self, ctx: &TaskContext, budget: Option<Duration>) -> Attempt {
        let handle = match self {
            Runnable::Plain(f) => {
                let f = f.clone();
                let ctx = ctx.clone();
                tokio::task::spawn_blocking(move || f(ctx))
            }
            Runnable::Env(f, env) => {
                let f = f.clone();
                let env = env.clone();
                let ctx = ctx.clone();
                tokio::task::spawn_blocking(move || f(ctx, env.as_ref()))
            }
        };
        await_blocking(ctx, handle, budget).await
    }
}

async fn await_blocking(
    ctx: &TaskContext,
    mut handle: JoinHandle<TaskResult>,
    budget: Option<Duration>,
) -> Attempt {
    let joined = tokio::select! {
        _ = ctx.cancel.cancelled() => return Attempt::Canceled,
        joined = async {
            match budget.filter(|d| !d.is_zero()) {
                Some(d) => match time::timeout(d, &mut handle).await {
                    Ok(j) => Some(j),
                    Err(_elapsed) => None,
                },
                None => Some((&mut handle).await),
            }
        } => joined,
    };
    match joined {
        // Soft deadline: flag the thread and move on; the parent holds the
        // hard deadline for a thread that never checks.
        None => {
            ctx.cancel.cancel();
            Attempt::TimedOut
        }
        Some(Ok(res)) => fold_result(ctx, "child process", res),
        Some(Err(join_err)) => {
            ctx.log(
                &format!(
                    "[{}] executor (child process) -> panicked: {join_err}",
                    ctx.name()
                ),
                LogLevel::Error,
            );
            Attempt::Fault
        }
    }
}

/// Policy A with a synchronous body.
async fn one_shot_sync(ctx: &TaskContext, body: &SyncFn, timeout: Option<Duration>) -> TaskReport {
    let name = ctx.name().to_string();
    ctx.log(
        &format!("[{name}] one-shot (child process) -> started"),
        LogLevel::Info,
    );
    match Runnable::Plain(body.clone()).attempt(ctx, timeout).await {
        Attempt::Done(value) => {
            ctx.log(
                &format!("[{name}] one-shot (child process) -> ended, output [{value}]"),
                LogLevel::Info,
            );
            TaskReport::correctly(&name, Some(value))
        }
        Attempt::TimedOut => {
            ctx.log(
                &format!(
                    "[{name}] one-shot (child process) -> ended by reaching the timeout [{timeout:?}]"
                ),
                LogLevel::Info,
            );
            TaskReport::timeout(&name)
        }
        Attempt::Fault => TaskReport::error(&name),
        Attempt::Canceled => TaskReport::correctly(&name, None),
    }
}

/// Policy B with a synchronous body; `started` anchors the budget so the
/// setup-then-loop form can charge its setup against the same clock.
async fn routine_sync(
    ctx: &TaskContext,
    runnable: &Runnable,
    refresh: Duration,
    timeout: Option<Duration>,
    started: Instant,
) -> TaskReport {
    let name = ctx.name().to_string();
    ctx.log(
        &format!("[{name}] routine (child process) -> started"),
        LogLevel::Info,
    );

    loop {
        let budget = match timeout {
            Some(t) => {
                let left = t.saturating_sub(started.elapsed());
                if left.is_zero() {
                    ctx.log(
                        &format!(
                            "[{name}] routine (child process) -> ended by reaching the timeout [{t:?}]"
                        ),
                        LogLevel::Info,
                    );
                    return TaskReport::timeout(&name);
                }
                Some(left)
            }
            None => None,
        };

        match runnable.attempt(ctx, budget).await {
            Attempt::Done(_) => {
                ctx.log(
                    &format!("[{name}] routine (child process) -> iteration ok"),
                    LogLevel::Info,
                );
            }
            Attempt::Fault => {}
            Attempt::TimedOut if timeout.is_some() => {
                ctx.log(
                    &format!(
                        "[{name}] routine (child process) -> ended by reaching the timeout [{timeout:?}]"
                    ),
                    LogLevel::Info,
                );
                return TaskReport::timeout(&name);
            }
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

/// Policy D: run the setup once, then loop the body over its environment.
async fn setup_then_loop(
    ctx: &TaskContext,
    setup: &SyncFn,
    body: &LoopFn,
    refresh: Duration,
    timeout: Option<Duration>,
) -> TaskReport {
    let name = ctx.name().to_string();
    ctx.log(
        &format!("[{name}] setup (child process) -> started"),
        LogLevel::Info,
    );
    let started = Instant::now();

    match Runnable::Plain(setup.clone()).attempt(ctx, timeout).await {
        Attempt::Done(env) => {
            ctx.log(
                &format!("[{name}] setup (child process) -> ended, entering loop"),
                LogLevel::Info,
            );
            routine_sync(
                ctx,
                &Runnable::Env(body.clone(), Arc::new(env)),
                refresh,
                timeout,
                started,
            )
            .await
        }
        // A setup fault terminates the task; the loop never runs.
        Attempt::Fault => TaskReport::error(&name),
        Attempt::TimedOut => {
            ctx.log(
                &format!(
                    "[{name}] setup (child process) -> ended by reaching the timeout [{timeout:?}]"
                ),
                LogLevel::Info,
            );
            TaskReport::timeout(&name)
        }
        Attempt::Canceled => TaskReport::correctly(&name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::ChildLink;
    use crate::error::TaskError;
    use crate::logger::test_support::RecordingLogger;
    use crate::report::ExecutionState;
    use crate::task_spec::TaskBuilder;
    use serde_json::json;
    use tokio::task::JoinHandle;

    /// Builds identical parent and child Brains, the way a re-executed host
    /// binary would.
    fn twin_brains(
        logger: Arc<RecordingLogger>,
        build: impl Fn(&Brain),
    ) -> (Brain, Brain) {
        let parent = Brain::new("twin", logger.clone());
        let child = Brain::new("twin", logger);
        build(&parent);
        build(&child);
        (parent, child)
    }

    /// Wires the pair over an in-memory duplex and attaches the link.
    async fn wire(parent: &Brain, child: Brain) -> JoinHandle<Result<(), RuntimeError>> {
        let (a, b) = tokio::io::duplex(1 << 16);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let link = ChildLink::connect(
            ar,
            aw,
            parent.inner().store.clone(),
            parent.inner().logger.clone(),
        );
        link.seed(&parent.inner().store).await.unwrap();
        let handle = tokio::spawn(serve(child, br, bw));
        parent.attach_child_link(link).await;
        handle
    }

    #[tokio::test]
    async fn child_one_shot_reports_over_the_wire() {
        let logger = RecordingLogger::arc();
        let (parent, child) = twin_brains(logger.clone(), |brain| {
            brain
                .register(
                    TaskBuilder::new("answer", true, true)
                        .build_sync(|_ctx| Ok(json!(42)))
                        .unwrap(),
                )
                .unwrap();
        });
        let served = wire(&parent, child).await;

        let report = parent.task("answer").unwrap().run().await;
        assert_eq!(report.status, ExecutionState::Correctly);
        assert_eq!(report.result, Some(json!(42)));
        // Child-side lifecycle lines came through the parent logger.
        assert!(logger.contains("one-shot (child process) -> started"));

        parent.shutdown().await;
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn child_routine_times_out_and_propagates_shared_writes() {
        let logger = RecordingLogger::arc();
        let (parent, child) = twin_brains(logger, |brain| {
            brain.input("n", 0i64);
            brain
                .register(
                    TaskBuilder::new("pump", true, true)
                        .refresh_rate(Duration::from_millis(20))
                        .timeout(Duration::from_millis(120))
                        .build_sync(|ctx| {
                            let n: i64 = ctx.shared().get("n").unwrap_or(0);
                            ctx.shared().set("n", n + 1);
                            Ok(json!(n + 1))
                        })
                        .unwrap(),
                )
                .unwrap();
        });
        let served = wire(&parent, child).await;

        let report = parent.task("pump").unwrap().run().await;
        assert_eq!(report.status, ExecutionState::Timeout);

        // One sync tick in each direction is enough for the writes to land.
        time::sleep(Duration::from_millis(60)).await;
        let stored: i64 = parent
            .inner()
            .store
            .get("n")
            .and_then(|(v, _)| serde_json::from_value(v).ok())
            .unwrap_or(0);
        assert!(stored >= 3, "expected >= 3 increments, got {stored}");
        let mirrored: i64 = parent.shared().get("n").unwrap_or(0);
        assert!(mirrored >= 3, "parent mirror saw {mirrored}");

        parent.shutdown().await;
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn setup_then_loop_shares_its_environment() {
        let logger = RecordingLogger::arc();
        let (parent, child) = twin_brains(logger.clone(), |brain| {
            brain
                .register(
                    TaskBuilder::new("greeter", true, true)
                        .refresh_rate(Duration::from_millis(20))
                        .timeout(Duration::from_millis(120))
                        .build_setup_loop(
                            |_ctx| Ok(json!({ "obj": "ready" })),
                            |ctx, env| {
                                let obj = env["obj"].as_str().unwrap_or("?");
                                ctx.log(&format!("loop sees {obj}"), LogLevel::Info);
                                Ok(json!(null))
                            },
                        )
                        .unwrap(),
                )
                .unwrap();
        });
        let served = wire(&parent, child).await;

        let report = parent.task("greeter").unwrap().run().await;
        assert_eq!(report.status, ExecutionState::Timeout);
        assert!(
            logger.matching("loop sees ready") >= 3,
            "loop should have run at least 3 times"
        );

        parent.shutdown().await;
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn setup_fault_prevents_the_loop() {
        let logger = RecordingLogger::arc();
        let (parent, child) = twin_brains(logger.clone(), |brain| {
            brain
                .register(
                    TaskBuilder::new("broken", true, true)
                        .refresh_rate(Duration::from_millis(20))
                        .build_setup_loop(
                            |_ctx| Err(TaskError::fail("no hardware")),
                            |ctx, _env| {
                                ctx.log("loop ran", LogLevel::Info);
                                Ok(json!(null))
                            },
                        )
                        .unwrap(),
                )
                .unwrap();
        });
        let served = wire(&parent, child).await;

        let report = parent.task("broken").unwrap().run().await;
        assert_eq!(report.status, ExecutionState::ErrorOccurred);
        assert_eq!(logger.matching("loop ran"), 0);

        parent.shutdown().await;
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn locals_are_absent_inside_the_child() {
        let logger = RecordingLogger::arc();
        let (parent, child) = twin_brains(logger, |brain| {
            brain.local("handle", 7i64);
            brain
                .register(
                    TaskBuilder::new("peek", true, true)
                        .build_sync(|ctx| Ok(json!(ctx.local::<i64>("handle").is_none())))
                        .unwrap(),
                )
                .unwrap();
        });
        let served = wire(&parent, child).await;

        let report = parent.task("peek").unwrap().run().await;
        assert_eq!(report.result, Some(json!(true)));
        // The main process still sees it.
        assert_eq!(parent.local_get::<i64>("handle"), Some(7));

        parent.shutdown().await;
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unknown_task_yields_an_error_report() {
        let logger = RecordingLogger::arc();
        let parent = Brain::new("twin", logger.clone());
        parent
            .register(
                TaskBuilder::new("ghost", true, true)
                    .build_sync(|_ctx| Ok(json!(null)))
                    .unwrap(),
            )
            .unwrap();
        // The child was built without the task.
        let child = Brain::new("twin", logger);
        let served = wire(&parent, child).await;

        let report = parent.task("ghost").unwrap().run().await;
        assert_eq!(report.status, ExecutionState::ErrorOccurred);

        parent.shutdown().await;
        assert!(served.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn dead_child_surfaces_a_transport_fault() {
        let logger = RecordingLogger::arc();
        let parent = Brain::new("twin", logger.clone());
        parent
            .register(
                TaskBuilder::new("forever", true, true)
                    .refresh_rate(Duration::from_millis(20))
                    .build_sync(|_ctx| Ok(json!(null)))
                    .unwrap(),
            )
            .unwrap();

        let (a, b) = tokio::io::duplex(1 << 16);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let link = ChildLink::connect(
            ar,
            aw,
            parent.inner().store.clone(),
            parent.inner().logger.clone(),
        );
        link.seed(&parent.inner().store).await.unwrap();
        parent.attach_child_link(link).await;

        // A child that accepts the request and dies without answering.
        tokio::spawn(async move {
            let mut lines = BufReader::new(br).lines();
            let _ = lines.next_line().await; // seed
            let _ = lines.next_line().await; // run
            drop(bw);
        });

        let report = parent.task("forever").unwrap().run().await;
        assert_eq!(report.status, ExecutionState::ErrorOccurred);
        assert!(logger.contains("child process unavailable"));
    }
}
