//! Parent-side endpoint of a Brain's child process.
//!
//! [`ChildLink`] owns the write half of the wire plus a reader loop that
//! dispatches child messages: execution reports complete their pending call,
//! `Sync` requests are answered against the shared store, and log lines are
//! forwarded to the logger. The child itself is the re-executed host binary
//! (see [`crate::worker`]); for tests the link also connects over any
//! reader/writer pair.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::time;

use crate::error::RuntimeError;
use crate::logger::{LogLevel, LoggerRef};
use crate::report::TaskReport;
use crate::store::SharedStore;
use crate::wire::{ChildMsg, ParentMsg, StoreEntry};
use crate::worker::CHILD_ENV;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<TaskReport>>>>;
type Writer = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Parent endpoint of one child process.
pub(crate) struct ChildLink {
    writer: Writer,
    pending: Pending,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    proc: Mutex<Option<Child>>,
}

impl ChildLink {
    /// Re-executes the current binary as a child worker for `brain`.
    pub(crate) fn spawn(
        brain: &str,
        store: SharedStore,
        logger: LoggerRef,
    ) -> Result<Self, RuntimeError> {
        let exe = std::env::current_exe()?;
        let mut child = Command::new(exe)
            .env(CHILD_ENV, brain)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| RuntimeError::ChildIo {
            reason: "child stdin unavailable".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| RuntimeError::ChildIo {
            reason: "child stdout unavailable".into(),
        })?;

        let link = Self::connect(stdout, stdin, store, logger);
        *link.proc.lock().unwrap_or_else(|p| p.into_inner()) = Some(child);
        Ok(link)
    }

    /// Wires a link over an arbitrary transport (in-memory in tests).
    pub(crate) fn connect<R, W>(reader: R, writer: W, store: SharedStore, logger: LoggerRef) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Writer = Arc::new(tokio::sync::Mutex::new(Box::new(writer)));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(read_loop(
            reader,
            writer.clone(),
            pending.clone(),
            alive.clone(),
            store,
            logger,
        ));

        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            alive,
            proc: Mutex::new(None),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) async fn send(&self, msg: &ParentMsg) -> Result<(), RuntimeError> {
        send_on(&self.writer, msg).await
    }

    /// Seeds the child's mirror with the authoritative store dump.
    pub(crate) async fn seed(&self, store: &SharedStore) -> Result<(), RuntimeError> {
        self.send(&ParentMsg::Seed {
            entries: StoreEntry::from_tuples(store.snapshot()),
        })
        .await
    }

    /// Sends a `Run` request; the returned channel yields its report.
    ///
    /// The pending slot is registered before the request leaves so a fast
    /// child cannot race the reader loop.
    pub(crate) async fn call(
        &self,
        task: &str,
    ) -> Result<(u64, oneshot::Receiver<TaskReport>), RuntimeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, tx);

        if let Err(e) = self
            .send(&ParentMsg::Run {
                id,
                task: task.to_string(),
            })
            .await
        {
            self.pending
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&id);
            return Err(e);
        }
        Ok((id, rx))
    }

    /// Soft-aborts an in-flight run (cancels its token inside the child).
    pub(crate) async fn cancel(&self, id: u64) {
        let _ = self.send(&ParentMsg::Cancel { id }).await;
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id);
    }

    /// Asks the child to exit, waiting up to `grace` before killing it.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        let _ = self.send(&ParentMsg::Shutdown).await;
        let deadline = time::Instant::now() + grace;
        while self.is_alive() && time::Instant::now() < deadline {
            time::sleep(Duration::from_millis(10)).await;
        }
        self.kill();
    }

    /// Hard abort: kills the OS process, if any.
    pub(crate) fn kill(&self) {
        let mut guard = self.proc.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(child) = guard.as_mut() {
            let _ = child.start_kill();
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

async fn send_on(writer: &Writer, msg: &ParentMsg) -> Result<(), RuntimeError> {
    let line = serde_json::to_string(msg).map_err(|e| RuntimeError::ChildIo {
        reason: e.to_string(),
    })?;
    let mut guard = writer.lock().await;
    let io = async {
        guard.write_all(line.as_bytes()).await?;
        guard.write_all(b"\n").await?;
        guard.flush().await
    };
    io.await.map_err(|e| RuntimeError::ChildIo {
        reason: e.to_string(),
    })
}

/// Dispatches child messages until the wire closes.
async fn read_loop<R>(
    reader: R,
    writer: Writer,
    pending: Pending,
    alive: Arc<AtomicBool>,
    store: SharedStore,
    logger: LoggerRef,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let msg: ChildMsg = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                logger.log(
                    &format!("[child] transport -> undecodable line: {e}"),
                    LogLevel::Warning,
                );
                continue;
            }
        };
        match msg {
            ChildMsg::Report { id, report } => {
                let sender = pending
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&id);
                if let Some(tx) = sender {
                    let _ = tx.send(report);
                }
            }
            ChildMsg::Sync { writes, known } => {
                for (key, value) in writes {
                    store.put(&key, value);
                }
                let known: HashMap<String, u64> = known.into_iter().collect();
                let updates = StoreEntry::from_tuples(store.changed_since(&known));
                let _ = send_on(&writer, &ParentMsg::SyncReply { updates }).await;
            }
            ChildMsg::Log { level, message } => logger.log(&message, level),
        }
    }

    // Wire closed: the child is gone. Dropping pending senders surfaces a
    // transport fault to every in-flight call.
    alive.store(false, Ordering::SeqCst);
    pending.lock().unwrap_or_else(|p| p.into_inner()).clear();
}
