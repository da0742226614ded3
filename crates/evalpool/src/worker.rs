//! The worker stub: an actor owning one interpreter subprocess.
//!
//! Every request against a worker — evaluate, measure memory, force a
//! restart — flows through a single `mpsc` command loop, so I/O against
//! the subprocess's pipes is always sequential even though many pool
//! manager callers may be racing to reach this worker through a shared
//! [`WorkerHandle`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use crate::error::{PoolError, Result};
use crate::memory::sample_rss_kib;
use crate::protocol::{read_frame, write_frame, EvalOutcome, EvalRequest, EvalStatus, ExitReason, RawReply};

/// Requests accepted by a worker stub's command loop.
enum WorkerCommand {
    Evaluate {
        code: String,
        timeout: Option<Duration>,
        max_mem_kib: Option<u64>,
        reply: oneshot::Sender<Result<EvalOutcome>>,
    },
    MeasureMemory {
        reply: oneshot::Sender<Result<u64>>,
    },
    /// Forces the subprocess to exit and respawn, then replays `requires`
    /// in order against the fresh subprocess. Used by the restart
    /// protocol and by memory-triggered recycling.
    ForceRestart {
        requires: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// A cheap, cloneable reference to a running worker stub.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerCommand>,
}

impl WorkerHandle {
    pub async fn evaluate(
        &self,
        code: impl Into<String>,
        timeout: Option<Duration>,
        max_mem_kib: Option<u64>,
    ) -> Result<EvalOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::Evaluate { code: code.into(), timeout, max_mem_kib, reply })
            .await
            .map_err(|_| PoolError::ManagerShutdown)?;
        rx.await.map_err(PoolError::from_recv_error)?
    }

    pub async fn measure_memory(&self) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::MeasureMemory { reply })
            .await
            .map_err(|_| PoolError::ManagerShutdown)?;
        rx.await.map_err(PoolError::from_recv_error)?
    }

    pub async fn force_restart(&self, requires: Vec<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::ForceRestart { requires, reply })
            .await
            .map_err(|_| PoolError::ManagerShutdown)?;
        rx.await.map_err(PoolError::from_recv_error)?
    }
}

/// Internal state of the worker stub's command loop.
struct WorkerActor {
    interpreter_path: PathBuf,
    interpreter_args: Vec<String>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    pid: u32,
    /// Init snippets replayed into the subprocess on every respawn, in
    /// order. Updated by `ForceRestart`; carried over untouched across a
    /// respawn triggered by timeout, crash, or memory overrun.
    requires: Vec<String>,
}

impl WorkerActor {
    fn adopt(interpreter_path: PathBuf, interpreter_args: Vec<String>, mut child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(BufReader::new);
        Self { interpreter_path, interpreter_args, child: Some(child), stdin, stdout, pid, requires: Vec::new() }
    }

    /// Kills and reaps the current subprocess (if any), spawns a fresh
    /// one, and replays every installed init snippet before returning —
    /// the `killed/spawned ─▶ init snippets ─▶ idle` transition applies
    /// unconditionally to every respawn, not only the restart protocol's
    /// `ForceRestart`.
    async fn respawn(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        let mut child = Command::new(&self.interpreter_path)
            .args(&self.interpreter_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        self.pid = child.id().unwrap_or(0);
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(BufReader::new);
        self.child = Some(child);
        tracing::info!(pid = self.pid, "worker subprocess (re)spawned");
        self.replay_requires().await
    }

    async fn ensure_alive(&mut self) -> Result<()> {
        if self.child.is_none() {
            self.respawn().await?;
        }
        Ok(())
    }

    /// Replays `self.requires` into the current subprocess, in order.
    /// Uses the raw frame round-trip directly rather than `evaluate()` —
    /// `evaluate()` calls back into `respawn()` on failure, and
    /// `respawn()` calls this, so going through `evaluate()` here would
    /// recurse.
    async fn replay_requires(&mut self) -> Result<()> {
        for snippet in self.requires.clone() {
            self.send_snippet(snippet).await?;
        }
        Ok(())
    }

    /// Writes one request frame and reads back its reply, assuming the
    /// subprocess is already alive. No timeout and no respawn-on-failure:
    /// this is only for trusted, operator-supplied require snippets, not
    /// arbitrary client input.
    async fn send_snippet(&mut self, code: String) -> Result<EvalOutcome> {
        let request = EvalRequest { code, timeout_ms: None, max_mem_kib: None };
        let stdin = self.stdin.as_mut().expect("respawn guarantees stdin is present");
        write_frame(stdin, &request).await?;
        let raw = self
            .read_reply(None)
            .await
            .map_err(|e| e.unwrap_or_else(|| std::io::Error::other("unexpected timeout reading require reply")))?;
        Ok(raw.into())
    }

    /// Reads exactly one reply frame, bounded by `timeout` if given.
    /// Isolated in its own method so the mutable borrow of `self.stdout`
    /// is released before `evaluate` calls back into `self.respawn()`.
    async fn read_reply(&mut self, timeout: Option<Duration>) -> std::result::Result<RawReply, Option<std::io::Error>> {
        let stdout = self.stdout.as_mut().expect("ensure_alive guarantees stdout is present");
        match timeout {
            Some(d) => match tokio::time::timeout(d, read_frame::<_, RawReply>(stdout)).await {
                Ok(Ok(raw)) => Ok(raw),
                Ok(Err(io_err)) => Err(Some(io_err)),
                Err(_elapsed) => Err(None),
            },
            None => read_frame::<_, RawReply>(stdout).await.map_err(Some),
        }
    }

    async fn evaluate(
        &mut self,
        code: String,
        timeout: Option<Duration>,
        max_mem_kib: Option<u64>,
    ) -> Result<EvalOutcome> {
        self.ensure_alive().await?;

        let request = EvalRequest {
            code,
            timeout_ms: timeout.map(|d| d.as_millis() as u64),
            max_mem_kib,
        };

        let stdin = self.stdin.as_mut().expect("ensure_alive guarantees stdin is present");
        write_frame(stdin, &request).await?;

        let read_result = self.read_reply(timeout).await;

        let raw = match read_result {
            Ok(raw) => raw,
            Err(None) => {
                tracing::warn!(pid = self.pid, "evaluation timed out, killing worker");
                self.respawn().await?;
                return Ok(EvalOutcome::Exit { reason: ExitReason::Timeout });
            }
            Err(Some(_io_err)) => {
                tracing::warn!(pid = self.pid, "worker subprocess died during evaluation");
                self.respawn().await?;
                return Ok(EvalOutcome::Exit { reason: ExitReason::Code(-1) });
            }
        };

        let mut outcome: EvalOutcome = raw.into();

        // The memory ceiling applies to any reply that carries a `status`
        // field, not just `Ok` — a `ParseError` reply still ran against a
        // subprocess that may now be over budget.
        let status = match &mut outcome {
            EvalOutcome::Ok { status, .. } => Some(status),
            EvalOutcome::ParseError { status, .. } => Some(status),
            EvalOutcome::Exit { .. } => None,
        };
        if let (Some(status), Some(ceiling)) = (status, max_mem_kib) {
            let rss = sample_rss_kib(self.pid).await.unwrap_or(0);
            if rss > ceiling {
                tracing::warn!(pid = self.pid, rss, ceiling, "worker exceeded memory ceiling, recycling");
                self.respawn().await?;
                *status = EvalStatus::Break;
            }
        }

        Ok(outcome)
    }

    async fn measure_memory(&mut self) -> Result<u64> {
        self.ensure_alive().await?;
        sample_rss_kib(self.pid).await
    }
}

/// Spawns the command loop for an already-running subprocess (adopted
/// from a [`crate::supervisor::Supervisor`]) and returns a handle to it.
/// `requires` is the init-snippet list installed at the time this worker
/// joins the pool; it is replayed once before the command loop starts
/// accepting `Evaluate`/`MeasureMemory` requests, mirroring what a
/// `ForceRestart` does for an already-running worker.
pub fn spawn_worker(
    interpreter_path: PathBuf,
    interpreter_args: Vec<String>,
    child: Child,
    requires: Vec<String>,
) -> WorkerHandle {
    let mut actor = WorkerActor::adopt(interpreter_path, interpreter_args, child);
    actor.requires = requires;
    let (tx, mut rx) = mpsc::channel::<WorkerCommand>(32);

    tokio::spawn(async move {
        let mut actor = actor;
        if let Err(err) = actor.replay_requires().await {
            tracing::warn!(pid = actor.pid, %err, "failed to replay init snippets at worker startup");
        }
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WorkerCommand::Evaluate { code, timeout, max_mem_kib, reply } => {
                    let result = actor.evaluate(code, timeout, max_mem_kib).await;
                    let _ = reply.send(result);
                }
                WorkerCommand::MeasureMemory { reply } => {
                    let result = actor.measure_memory().await;
                    let _ = reply.send(result);
                }
                WorkerCommand::ForceRestart { requires, reply } => {
                    actor.requires = requires;
                    let result = actor.respawn().await;
                    let _ = reply.send(result);
                }
            }
        }
    });

    WorkerHandle { tx }
}
