//! The client-facing facade: a thin, stateless, cheaply `Clone`-able
//! handle over the pool manager's command channel, plus the `call`/
//! `invoke_return` convenience wrappers that quote scalar arguments into
//! a snippet the interpreter subprocess can evaluate directly.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::{PoolError, Result};
use crate::pool::{spawn_manager, ManagerCommand};
use crate::protocol::EvalOutcome;
use crate::reservation::{ReservationToken, RequireToken};
use crate::supervisor::{StaticSupervisor, Supervisor};

/// A scalar argument to [`PoolHandle::call`]/[`PoolHandle::invoke_return`].
/// Quoting is only specified for these three shapes; anything richer is
/// the caller's responsibility to embed directly in an `eval` snippet.
#[derive(Debug, Clone)]
pub enum CallArg {
    Str(String),
    Int(i64),
    Float(f64),
}

impl CallArg {
    fn quoted(&self) -> String {
        match self {
            CallArg::Int(n) => n.to_string(),
            CallArg::Float(f) => f.to_string(),
            CallArg::Str(s) => {
                let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
                format!("'{escaped}'")
            }
        }
    }
}

fn call_expression(function: &str, args: &[CallArg]) -> String {
    let quoted_args: Vec<String> = args.iter().map(CallArg::quoted).collect();
    format!("{function}({})", quoted_args.join(", "))
}

/// Stateless handle to a running pool manager. Cloning is cheap — it
/// only clones the underlying `mpsc::Sender`.
#[derive(Clone)]
pub struct PoolHandle {
    tx: mpsc::Sender<ManagerCommand>,
}

impl PoolHandle {
    /// Spawns a pool manager that owns its own worker subprocesses,
    /// discovered through a [`StaticSupervisor`].
    pub async fn start(config: Config) -> Result<Self> {
        let supervisor = StaticSupervisor::spawn(&config).await?;
        Ok(Self::with_supervisor(config, Box::new(supervisor)))
    }

    /// Spawns a pool manager against a caller-supplied supervisor, for
    /// embedders that run their own process tree.
    pub fn with_supervisor(config: Config, supervisor: Box<dyn Supervisor + Send>) -> Self {
        Self { tx: spawn_manager(config, supervisor) }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> std::result::Result<T, PoolError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| PoolError::ManagerShutdown)?;
        rx.await.map_err(PoolError::from_recv_error)
    }

    /// Evaluates `code`. `token` pins the call to an existing reservation
    /// (failing with [`PoolError::InvalidReservation`] if it is not
    /// live); without one, the manager transiently reserves and releases
    /// a worker around the call.
    pub async fn eval(
        &self,
        code: impl Into<String>,
        token: Option<ReservationToken>,
        timeout: Option<Duration>,
    ) -> Result<EvalOutcome> {
        self.request(|reply| ManagerCommand::Eval { code: code.into(), token, timeout, reply }).await?
    }

    /// `eval(code)` with no reservation and no timeout.
    pub async fn eval_simple(&self, code: impl Into<String>) -> Result<EvalOutcome> {
        self.eval(code, None, None).await
    }

    /// `eval(code, token)`.
    pub async fn eval_with_token(&self, code: impl Into<String>, token: ReservationToken) -> Result<EvalOutcome> {
        self.eval(code, Some(token), None).await
    }

    /// Reserves a worker, queueing FIFO behind any existing waiters.
    pub async fn reserve(&self, max_mem_kib: Option<u64>) -> Result<ReservationToken> {
        self.request(|reply| ManagerCommand::Reserve { max_mem_kib, reply }).await?
    }

    /// Releases a reservation, immediately handing the worker to the
    /// head waiter if one is queued.
    pub async fn release(&self, token: ReservationToken) -> Result<()> {
        self.request(|reply| ManagerCommand::Release { token, reply }).await?
    }

    /// Samples the resident memory (KiB) of the worker behind `token`.
    pub async fn get_memory(&self, token: ReservationToken) -> Result<u64> {
        self.request(|reply| ManagerCommand::GetMemory { token, reply }).await?
    }

    /// Initiates a rolling restart of every worker, or joins one already
    /// in flight. Resolves once every worker live at call time has been
    /// recycled.
    pub async fn restart_all(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::RestartAll { reply }).await
    }

    /// Installs an initialization snippet, replayed on every worker
    /// respawn from now on. Has no effect on already-running workers
    /// until a subsequent [`PoolHandle::restart_all`].
    pub async fn require_code(&self, snippet: impl Into<String>) -> Result<RequireToken> {
        let snippet = snippet.into();
        self.request(|reply| ManagerCommand::RequireCode { snippet, reply }).await
    }

    /// Removes a previously installed require entry and triggers its own
    /// independent rolling restart so the change takes effect.
    pub async fn unrequire_code(&self, token: RequireToken) -> Result<()> {
        self.request(|reply| ManagerCommand::UnrequireCode { token, reply }).await?
    }

    /// Evaluates a call to `function` with `args` quoted as single-quoted
    /// scalar literals, discarding any return value distinction (the
    /// snippet's own semantics decide what `eval`'s result carries).
    pub async fn call(&self, function: &str, args: &[CallArg]) -> Result<EvalOutcome> {
        let snippet = format!("{};", call_expression(function, args));
        self.eval_simple(snippet).await
    }

    /// Evaluates `return function(args);`.
    pub async fn invoke_return(&self, function: &str, args: &[CallArg]) -> Result<EvalOutcome> {
        let snippet = format!("return {};", call_expression(function, args));
        self.eval_simple(snippet).await
    }
}
