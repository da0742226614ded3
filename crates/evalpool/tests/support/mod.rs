//! Shared test scaffolding: a `Config` wired at the fixture interpreter
//! binary built by the `fake-interpreter` `[[bin]]` target.

use std::path::PathBuf;
use std::time::Duration;

use evalpool::Config;

pub fn fixture_interpreter_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fake-interpreter"))
}

pub fn config_with_workers(worker_count: usize) -> Config {
    Config {
        interpreter_path: fixture_interpreter_path(),
        interpreter_args: Vec::new(),
        init_snippet: None,
        default_max_mem_kib: None,
        worker_count,
        eval_checkout_timeout: Duration::from_secs(5),
    }
}
