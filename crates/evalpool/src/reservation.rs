//! Token types and the internal bookkeeping records the pool manager
//! keeps per reservation, waiter, restart operation and require entry.
//!
//! Tokens are minted from a single process-wide counter owned by the
//! pool manager and are otherwise opaque: nothing outside this crate can
//! construct one, so a caller can never forge a reservation it was never
//! handed.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::worker::WorkerHandle;

static NEXT_RESERVATION: AtomicU64 = AtomicU64::new(1);
static NEXT_REQUIRE: AtomicU64 = AtomicU64::new(1);

/// An opaque, unforgeable handle to an exclusive lease on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReservationToken(u64);

impl ReservationToken {
    pub(crate) fn next() -> Self {
        Self(NEXT_RESERVATION.fetch_add(1, Ordering::Relaxed))
    }
}

/// An opaque handle to an installed `requireCode` initialization snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequireToken(u64);

impl RequireToken {
    pub(crate) fn next() -> Self {
        Self(NEXT_REQUIRE.fetch_add(1, Ordering::Relaxed))
    }
}

/// A caller queued because no worker was free at `reserve`/token-less
/// `eval` time. Fulfilled with the granted token and a handle to the
/// worker it now owns; a token-less `eval` caller uses the handle
/// directly, a plain `reserve` caller forwards only the token.
pub(crate) struct WaitingRequest {
    pub max_mem_kib: Option<u64>,
    pub reply: tokio::sync::oneshot::Sender<(ReservationToken, WorkerHandle)>,
}

/// The single in-flight rolling restart, if any.
pub(crate) struct RestartOperation {
    /// Worker ids (indices into the manager's worker table) still
    /// awaiting their restart-on-release.
    pub pending: std::collections::HashSet<usize>,
    pub reply_targets: Vec<tokio::sync::oneshot::Sender<()>>,
}

/// One installed initialization snippet, replayed on every worker
/// respawn in insertion order.
pub(crate) struct RequireEntry {
    pub token: RequireToken,
    pub snippet: String,
}
