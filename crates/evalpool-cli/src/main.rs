use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use evalpool::{Config, PoolHandle};

/// Start a short-lived evaluator pool, evaluate one snippet, print its
/// result as JSON, and exit.
#[derive(Parser, Debug)]
#[command(name = "evalpool-cli", about = "Evaluate a snippet against a pool of interpreter subprocesses")]
struct Args {
    /// Read the snippet from a file instead of stdin.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Path to the interpreter binary each worker subprocess runs.
    #[arg(long, env = "EVALPOOL_INTERPRETER_PATH")]
    interpreter: Option<PathBuf>,

    /// Number of worker subprocesses to start (default: logical CPU count).
    #[arg(long)]
    workers: Option<usize>,

    /// Timeout for the evaluation, in milliseconds. Omit for unbounded.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Per-worker resident memory ceiling, in KiB. Omit for unbounded.
    #[arg(long)]
    max_mem_kib: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let code = if let Some(path) = &args.file {
        std::fs::read_to_string(path).unwrap_or_else(|e| {
            eprintln!("error reading {}: {e}", path.display());
            std::process::exit(1);
        })
    } else {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).unwrap_or_else(|e| {
            eprintln!("error reading stdin: {e}");
            std::process::exit(1);
        });
        buf
    };

    let mut config = Config::default();
    if let Some(interpreter) = args.interpreter {
        config.interpreter_path = interpreter;
    }
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(max_mem_kib) = args.max_mem_kib {
        config.default_max_mem_kib = Some(max_mem_kib);
    }

    let pool = match PoolHandle::start(config).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("failed to start pool: {e}");
            std::process::exit(1);
        }
    };

    let timeout = args.timeout_ms.map(Duration::from_millis);
    let outcome = pool.eval(code, None, timeout).await;

    // Errors here are reservation/argument/shutdown failures at the
    // façade boundary, not routine per-evaluation outcomes (those are
    // already folded into `EvalOutcome` and serialize directly).
    let json = match outcome {
        Ok(outcome) => serde_json::to_string(&outcome),
        Err(e) => serde_json::to_string(&serde_json::json!({ "error": e.to_string() })),
    };
    println!("{}", json.expect("result is always serializable"));
}
