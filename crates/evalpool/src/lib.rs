//! Pool manager that multiplexes evaluation requests across a bounded
//! set of persistent interpreter subprocesses.
//!
//! [`client::PoolHandle`] is the entry point: start one with
//! [`client::PoolHandle::start`] and call `eval`/`reserve`/`release`/
//! `get_memory`/`restart_all`/`require_code`/`unrequire_code` on it.

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod pool;
pub mod protocol;
pub mod reservation;
pub mod supervisor;
pub mod worker;

pub use client::{CallArg, PoolHandle};
pub use config::Config;
pub use error::{PoolError, Result};
pub use protocol::{EvalOutcome, EvalStatus, ExitReason};
pub use reservation::{ReservationToken, RequireToken};
pub use supervisor::{ChildInfo, ChildKind, StaticSupervisor, Supervisor};
