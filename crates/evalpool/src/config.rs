//! Pool configuration.
//!
//! Loaded the way small services in this codebase load configuration: an
//! explicit struct with a [`Default`] impl, overridable from environment
//! variables read once at startup. No file-based config layer — the spec
//! this crate implements treats config loading as an embedding concern.

use std::path::PathBuf;
use std::time::Duration;

/// Static configuration for a [`crate::pool::PoolManager`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the interpreter binary each worker subprocess runs.
    pub interpreter_path: PathBuf,

    /// Fixed arguments passed to every interpreter spawn.
    pub interpreter_args: Vec<String>,

    /// Snippet installed as the first `requireCode` entry before the
    /// manager starts accepting `reserve` calls. `None` installs nothing.
    pub init_snippet: Option<String>,

    /// Default memory ceiling (KiB) applied when `reserve`/`eval` omit one.
    /// `None` means unbounded.
    pub default_max_mem_kib: Option<u64>,

    /// Number of concurrent workers. Defaults to the logical CPU count.
    pub worker_count: usize,

    /// How long an unreserved `eval` waits for a worker to become
    /// available before giving up.
    pub eval_checkout_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            interpreter_path: PathBuf::from(
                std::env::var("EVALPOOL_INTERPRETER_PATH").unwrap_or_else(|_| "interpreter".into()),
            ),
            interpreter_args: Vec::new(),
            init_snippet: None,
            default_max_mem_kib: std::env::var("EVALPOOL_DEFAULT_MAX_MEM_KIB")
                .ok()
                .and_then(|v| v.parse().ok()),
            worker_count: std::env::var("EVALPOOL_WORKER_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(worker_count),
            eval_checkout_timeout: Duration::from_secs(
                std::env::var("EVALPOOL_EVAL_CHECKOUT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
