//! The pool manager: the single serializer that owns every worker's
//! free/reserved state, the waiting queue, the active restart operation
//! and the installed require entries.
//!
//! Every operation below is a variant of [`ManagerCommand`] drained one
//! at a time from a single `mpsc::Receiver`, so state mutation is always
//! observed in one total order without a mutex. Anything that can block
//! on subprocess I/O — an evaluation, a memory probe, a forced restart —
//! is handed to a short-lived detached task; the command loop itself
//! never awaits subprocess I/O directly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::{PoolError, Result};
use crate::protocol::EvalOutcome;
use crate::reservation::{RequireEntry, ReservationToken, RequireToken, RestartOperation, WaitingRequest};
use crate::supervisor::{ChildKind, Supervisor};
use crate::worker::{spawn_worker, WorkerHandle};

/// Requests the pool manager's command loop accepts. Mirrors the client
/// API one-to-one, plus two internal variants used by detached tasks to
/// report back without touching state directly.
pub(crate) enum ManagerCommand {
    Eval {
        code: String,
        token: Option<ReservationToken>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<EvalOutcome>>,
    },
    Reserve {
        max_mem_kib: Option<u64>,
        reply: oneshot::Sender<Result<ReservationToken>>,
    },
    Release {
        token: ReservationToken,
        reply: oneshot::Sender<Result<()>>,
    },
    GetMemory {
        token: ReservationToken,
        reply: oneshot::Sender<Result<u64>>,
    },
    RestartAll {
        reply: oneshot::Sender<()>,
    },
    RequireCode {
        snippet: String,
        reply: oneshot::Sender<RequireToken>,
    },
    UnrequireCode {
        token: RequireToken,
        reply: oneshot::Sender<Result<()>>,
    },
    /// A token-less `eval`'s internal self-release once its detached
    /// task has finished with the worker it was transiently handed.
    ReleaseInternal { token: ReservationToken },
    /// A detached restart task reporting that `worker_id` has finished
    /// exiting, respawning, and replaying every require entry.
    RestartComplete { worker_id: usize },
}

enum Allocation {
    Immediate(ReservationToken, WorkerHandle),
    Queued(oneshot::Receiver<(ReservationToken, WorkerHandle)>),
}

struct PoolManager {
    config: Config,
    supervisor: Option<Box<dyn Supervisor + Send>>,
    workers: Vec<WorkerHandle>,
    free: VecDeque<usize>,
    reserved: HashMap<ReservationToken, (usize, Option<u64>)>,
    waiting: VecDeque<WaitingRequest>,
    restart: Option<RestartOperation>,
    requires: Vec<RequireEntry>,
    self_tx: mpsc::Sender<ManagerCommand>,
}

impl PoolManager {
    fn ensure_bootstrapped(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        let Some(mut supervisor) = self.supervisor.take() else {
            return;
        };
        let requires = self.requires_snapshot();
        for info in supervisor.enumerate_children() {
            if info.kind != ChildKind::EvaluatorWorker {
                continue;
            }
            let Some(child) = supervisor.take_child(&info.id) else {
                continue;
            };
            let handle = spawn_worker(
                self.config.interpreter_path.clone(),
                self.config.interpreter_args.clone(),
                child,
                requires.clone(),
            );
            self.workers.push(handle);
            self.free.push_back(self.workers.len() - 1);
        }
        tracing::info!(worker_count = self.workers.len(), "pool bootstrapped from supervisor");
    }

    fn requires_snapshot(&self) -> Vec<String> {
        self.requires.iter().map(|e| e.snippet.clone()).collect()
    }

    /// Grants a free worker immediately, or enqueues the caller at the
    /// tail of `waiting`. Per the FIFO tie-break rule, a request is
    /// always enqueued — never jumped ahead of existing waiters — even
    /// when a worker happens to be free.
    fn allocate_or_queue(&mut self, max_mem_kib: Option<u64>) -> Allocation {
        self.ensure_bootstrapped();

        if self.waiting.is_empty() {
            if let Some(worker_id) = self.free.pop_front() {
                let token = ReservationToken::next();
                self.reserved.insert(token, (worker_id, max_mem_kib));
                return Allocation::Immediate(token, self.workers[worker_id].clone());
            }
        }

        let (reply, rx) = oneshot::channel();
        self.waiting.push_back(WaitingRequest { max_mem_kib, reply });
        Allocation::Queued(rx)
    }

    /// Returns a released worker to service: hands it straight to the
    /// head waiter if one exists, otherwise returns it to `free`.
    fn serve_or_free(&mut self, worker_id: usize) {
        if let Some(waiter) = self.waiting.pop_front() {
            let token = ReservationToken::next();
            self.reserved.insert(token, (worker_id, waiter.max_mem_kib));
            let _ = waiter.reply.send((token, self.workers[worker_id].clone()));
        } else {
            self.free.push_back(worker_id);
        }
    }

    /// Spawns the short-lived task that forces `worker_id` through an
    /// exit/respawn/replay cycle and reports completion back through the
    /// manager's own command channel.
    fn spawn_restart_task(&self, worker_id: usize) {
        let handle = self.workers[worker_id].clone();
        let requires = self.requires_snapshot();
        let cmd_tx = self.self_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = handle.force_restart(requires).await {
                tracing::warn!(worker_id, %err, "forced restart failed");
            }
            let _ = cmd_tx.send(ManagerCommand::RestartComplete { worker_id }).await;
        });
    }

    /// Starts a new rolling restart if none is active, otherwise joins
    /// the in-flight one. `reply` is `None` for the restart kicked off by
    /// `unrequireCode`, which replies to its own caller independently and
    /// does not graft its completion onto this restart's reply list.
    fn begin_or_join_restart(&mut self, reply: Option<oneshot::Sender<()>>) {
        if let Some(op) = &mut self.restart {
            if let Some(reply) = reply {
                op.reply_targets.push(reply);
            }
            return;
        }

        let pending: HashSet<usize> = (0..self.workers.len()).collect();
        let reply_targets = reply.into_iter().collect::<Vec<_>>();
        self.restart = Some(RestartOperation { pending, reply_targets });

        // Flushing pokes: every currently idle worker is restarted right
        // away since nothing else will ever release it on our behalf.
        // Reserved workers are caught by the release fence later.
        let free_ids: Vec<usize> = self.free.drain(..).collect();
        for worker_id in free_ids {
            self.spawn_restart_task(worker_id);
        }

        self.complete_restart_if_done();
    }

    fn complete_restart_if_done(&mut self) {
        let done = self.restart.as_ref().is_some_and(|op| op.pending.is_empty());
        if done {
            let op = self.restart.take().expect("checked Some above");
            for target in op.reply_targets {
                let _ = target.send(());
            }
        }
    }

    fn handle(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Eval { code, token, timeout, reply } => self.handle_eval(code, token, timeout, reply),
            ManagerCommand::Reserve { max_mem_kib, reply } => self.handle_reserve(max_mem_kib, reply),
            ManagerCommand::Release { token, reply } => self.handle_release(token, Some(reply)),
            ManagerCommand::ReleaseInternal { token } => self.handle_release(token, None),
            ManagerCommand::GetMemory { token, reply } => self.handle_get_memory(token, reply),
            ManagerCommand::RestartAll { reply } => self.begin_or_join_restart(Some(reply)),
            ManagerCommand::RequireCode { snippet, reply } => {
                let token = RequireToken::next();
                self.requires.push(RequireEntry { token, snippet });
                let _ = reply.send(token);
            }
            ManagerCommand::UnrequireCode { token, reply } => self.handle_unrequire(token, reply),
            ManagerCommand::RestartComplete { worker_id } => {
                if let Some(op) = &mut self.restart {
                    op.pending.remove(&worker_id);
                }
                self.serve_or_free(worker_id);
                self.complete_restart_if_done();
            }
        }
    }

    fn handle_eval(
        &mut self,
        code: String,
        token: Option<ReservationToken>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<EvalOutcome>>,
    ) {
        match token {
            Some(token) => match self.reserved.get(&token) {
                Some(&(worker_id, max_mem_kib)) => {
                    let handle = self.workers[worker_id].clone();
                    tokio::spawn(async move {
                        let result = handle.evaluate(code, timeout, max_mem_kib).await;
                        let _ = reply.send(result);
                    });
                }
                None => {
                    let _ = reply.send(Err(PoolError::InvalidReservation));
                }
            },
            None => {
                let max_mem_kib = self.config.default_max_mem_kib;
                match self.allocate_or_queue(max_mem_kib) {
                    Allocation::Immediate(token, handle) => {
                        self.spawn_transient_eval(token, handle, code, timeout, max_mem_kib, reply);
                    }
                    Allocation::Queued(rx) => {
                        let self_tx = self.self_tx.clone();
                        let checkout_timeout = self.config.eval_checkout_timeout;
                        tokio::spawn(async move {
                            match tokio::time::timeout(checkout_timeout, rx).await {
                                Ok(Ok((token, handle))) => {
                                    let result = handle.evaluate(code, timeout, max_mem_kib).await;
                                    let _ = self_tx.send(ManagerCommand::ReleaseInternal { token }).await;
                                    let _ = reply.send(result);
                                }
                                Ok(Err(_)) => {
                                    let _ = reply.send(Err(PoolError::ManagerShutdown));
                                }
                                Err(_elapsed) => {
                                    let _ = reply.send(Err(PoolError::CheckoutTimeout));
                                }
                            }
                        });
                    }
                }
            }
        }
    }

    fn spawn_transient_eval(
        &self,
        token: ReservationToken,
        handle: WorkerHandle,
        code: String,
        timeout: Option<Duration>,
        max_mem_kib: Option<u64>,
        reply: oneshot::Sender<Result<EvalOutcome>>,
    ) {
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = handle.evaluate(code, timeout, max_mem_kib).await;
            let _ = self_tx.send(ManagerCommand::ReleaseInternal { token }).await;
            let _ = reply.send(result);
        });
    }

    fn handle_reserve(&mut self, max_mem_kib: Option<u64>, reply: oneshot::Sender<Result<ReservationToken>>) {
        let max_mem_kib = max_mem_kib.or(self.config.default_max_mem_kib);
        match self.allocate_or_queue(max_mem_kib) {
            Allocation::Immediate(token, _handle) => {
                let _ = reply.send(Ok(token));
            }
            Allocation::Queued(rx) => {
                tokio::spawn(async move {
                    match rx.await {
                        Ok((token, _handle)) => {
                            let _ = reply.send(Ok(token));
                        }
                        Err(_) => {
                            let _ = reply.send(Err(PoolError::ManagerShutdown));
                        }
                    }
                });
            }
        }
    }

    fn handle_release(&mut self, token: ReservationToken, reply: Option<oneshot::Sender<Result<()>>>) {
        match self.reserved.remove(&token) {
            None => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(PoolError::InvalidReservation));
                }
            }
            Some((worker_id, _max_mem_kib)) => {
                let in_restart = self.restart.as_ref().is_some_and(|op| op.pending.contains(&worker_id));
                if in_restart {
                    self.spawn_restart_task(worker_id);
                } else {
                    self.serve_or_free(worker_id);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
        }
    }

    fn handle_get_memory(&mut self, token: ReservationToken, reply: oneshot::Sender<Result<u64>>) {
        match self.reserved.get(&token) {
            Some(&(worker_id, _)) => {
                let handle = self.workers[worker_id].clone();
                tokio::spawn(async move {
                    let result = handle.measure_memory().await;
                    let _ = reply.send(result);
                });
            }
            None => {
                let _ = reply.send(Err(PoolError::InvalidReservation));
            }
        }
    }

    fn handle_unrequire(&mut self, token: RequireToken, reply: oneshot::Sender<Result<()>>) {
        match self.requires.iter().position(|e| e.token == token) {
            Some(index) => {
                self.requires.remove(index);
                let _ = reply.send(Ok(()));
                // Independent follow-up: does not nest inside this reply,
                // per the resolved open question on unrequireCode.
                self.begin_or_join_restart(None);
            }
            None => {
                let _ = reply.send(Err(PoolError::InvalidArgument("unknown require token".into())));
            }
        }
    }
}

/// Starts the pool manager's command loop and returns the sender half of
/// its channel. `supervisor` is queried lazily, on the first request that
/// needs a worker.
pub(crate) fn spawn_manager(config: Config, supervisor: Box<dyn Supervisor + Send>) -> mpsc::Sender<ManagerCommand> {
    let (tx, mut rx) = mpsc::channel(1024);
    let self_tx = tx.clone();

    let mut requires = Vec::new();
    if let Some(snippet) = config.init_snippet.clone() {
        requires.push(RequireEntry { token: RequireToken::next(), snippet });
    }

    let mut manager = PoolManager {
        config,
        supervisor: Some(supervisor),
        workers: Vec::new(),
        free: VecDeque::new(),
        reserved: HashMap::new(),
        waiting: VecDeque::new(),
        restart: None,
        requires,
        self_tx,
    };

    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            manager.handle(cmd);
        }
        tracing::info!("pool manager command loop exiting");
    });

    tx
}
