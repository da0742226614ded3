//! Error taxonomy for the pool manager and its client facade.
//!
//! Per-evaluation outcomes (`parseError`, `exit`, timeout) are ordinary
//! values carried on [`crate::protocol::EvalOutcome`], not `Err` variants —
//! they happen routinely and callers are expected to match on them. This
//! enum covers the boundary failures: a reservation that no longer exists,
//! a malformed call, an I/O failure talking to a subprocess, or the
//! manager having gone away.

use thiserror::Error;

/// Errors returned by [`crate::client::PoolHandle`] operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The supplied token does not name a live reservation.
    #[error("invalid reservation")]
    InvalidReservation,

    /// A caller-supplied argument was malformed (e.g. a negative timeout).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O failure talking to a worker subprocess.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The pool manager's task has exited; no further requests can be served.
    #[error("pool manager has shut down")]
    ManagerShutdown,

    /// An unreserved `eval` waited longer than [`crate::config::Config::eval_checkout_timeout`]
    /// for a free worker. The caller gives up; the queued waiter itself is not retracted from
    /// the manager's `waiting` queue and may still be served later with no caller listening.
    #[error("timed out waiting for a free worker")]
    CheckoutTimeout,
}

impl PoolError {
    /// Maps a dropped `oneshot::Receiver` (the manager task exited before
    /// replying) to the appropriate error. Every facade call that awaits a
    /// reply channel goes through this to avoid repeating the match arm.
    pub(crate) fn from_recv_error(_: tokio::sync::oneshot::error::RecvError) -> Self {
        PoolError::ManagerShutdown
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
