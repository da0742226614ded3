//! The supervisor boundary.
//!
//! The process that launches the pool manager and the fixed set of worker
//! subprocesses is a separate collaborator; this crate only needs to be
//! able to ask it what children exist and to take ownership of their
//! pipes. [`StaticSupervisor`] covers the common case of a standalone
//! binary that spawns its own workers; embedding applications that run
//! their own process tree can supply any other [`Supervisor`]
//! implementation.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::Config;
use crate::error::Result;

/// What kind of child a supervisor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    EvaluatorWorker,
    Other,
}

/// One entry from `enumerateChildren()`.
#[derive(Debug, Clone)]
pub struct ChildInfo {
    pub id: String,
    pub pid: u32,
    pub kind: ChildKind,
    pub tags: Vec<String>,
}

/// Supplies the pool manager with the set of evaluator worker processes
/// it should attach to. Queried exactly once, lazily, on the manager's
/// first `reserve` call.
pub trait Supervisor: Send {
    fn enumerate_children(&self) -> Vec<ChildInfo>;

    /// Hands ownership of the named child's process handle to the caller.
    /// Returns `None` if `id` is unknown or has already been taken. The
    /// manager calls this once per worker during bootstrap so each
    /// resulting worker stub owns its subprocess's pipes directly.
    fn take_child(&mut self, id: &str) -> Option<Child>;
}

/// A supervisor that owns spawning the worker subprocesses itself. Used
/// when the pool manager is the top of its own process tree rather than
/// attaching to processes started by something else.
pub struct StaticSupervisor {
    children: HashMap<String, Child>,
    infos: Vec<ChildInfo>,
}

impl StaticSupervisor {
    /// Spawns `config.worker_count` interpreter subprocesses and reports
    /// them all as evaluator workers.
    pub async fn spawn(config: &Config) -> Result<Self> {
        let mut children = HashMap::with_capacity(config.worker_count);
        let mut infos = Vec::with_capacity(config.worker_count);

        for i in 0..config.worker_count {
            let child = Command::new(&config.interpreter_path)
                .args(&config.interpreter_args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()?;
            let pid = child.id().unwrap_or(0);
            let id = format!("worker-{i}");
            infos.push(ChildInfo {
                id: id.clone(),
                pid,
                kind: ChildKind::EvaluatorWorker,
                tags: vec!["evaluator".into()],
            });
            children.insert(id, child);
        }

        Ok(Self { children, infos })
    }
}

impl Supervisor for StaticSupervisor {
    fn enumerate_children(&self) -> Vec<ChildInfo> {
        self.infos.clone()
    }

    fn take_child(&mut self, id: &str) -> Option<Child> {
        self.children.remove(id)
    }
}
