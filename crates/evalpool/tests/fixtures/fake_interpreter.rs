//! A stand-in for the out-of-scope interpreter subprocess, speaking
//! exactly the §6 wire contract: 4-byte big-endian length prefix
//! followed by a JSON body, on both stdin and stdout.
//!
//! Implements a tiny scripting surface just large enough to drive the
//! pool manager's tests: `echo`, `return`, `sleep`, `allocateHugeBuffer`,
//! `exit`, and `setGlobal`/`readGlobal` for require-entry coverage.
//! Anything else is a syntax error. Deliberately blocking/std-only — a
//! real interpreter subprocess has no reason to depend on tokio.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use evalpool::protocol::{EvalRequest, EvalStatus, RawReply};

fn read_frame(stdin: &mut impl Read) -> io::Result<Option<EvalRequest>> {
    let mut len_buf = [0u8; 4];
    match stdin.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stdin.read_exact(&mut body)?;
    let req: EvalRequest = serde_json::from_slice(&body)?;
    Ok(Some(req))
}

fn write_frame(stdout: &mut impl Write, reply: &RawReply) -> io::Result<()> {
    let body = serde_json::to_vec(reply)?;
    stdout.write_all(&(body.len() as u32).to_be_bytes())?;
    stdout.write_all(&body)?;
    stdout.flush()
}

enum Expr {
    Int(i64),
    Str(String),
    Global(String),
}

fn unquote(lit: &str) -> Option<String> {
    let inner = lit.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace("\\'", "'").replace("\\\\", "\\"))
}

fn parse_expr(s: &str) -> Option<Expr> {
    let s = s.trim();
    if let Some(key) = s.strip_prefix("readGlobal(").and_then(|rest| rest.strip_suffix(')')) {
        return Some(Expr::Global(unquote(key.trim())?));
    }
    if let Some(quoted) = unquote(s) {
        return Some(Expr::Str(quoted));
    }
    s.parse::<i64>().ok().map(Expr::Int)
}

fn expr_value(expr: &Expr, globals: &HashMap<String, serde_json::Value>) -> serde_json::Value {
    match expr {
        Expr::Int(n) => serde_json::json!(n),
        Expr::Str(s) => serde_json::json!(s),
        Expr::Global(key) => globals.get(key).cloned().unwrap_or(serde_json::Value::Null),
    }
}

/// Evaluates one statement, mutating the persistent global map and the
/// big-allocation sink. Returns `Err(message)` on unrecognized syntax.
fn run_statement(
    stmt: &str,
    stdout: &mut String,
    return_value: &mut serde_json::Value,
    globals: &mut HashMap<String, serde_json::Value>,
    leaks: &mut Vec<Vec<u8>>,
) -> Result<(), String> {
    if let Some(arg) = stmt.strip_prefix("echo ") {
        let text = unquote(arg.trim()).ok_or_else(|| format!("bad echo literal: {arg}"))?;
        stdout.push_str(&text);
        return Ok(());
    }
    if let Some(arg) = stmt.strip_prefix("return ") {
        let expr = parse_expr(arg).ok_or_else(|| format!("bad return expression: {arg}"))?;
        *return_value = expr_value(&expr, globals);
        return Ok(());
    }
    if let Some(arg) = stmt.strip_prefix("sleep ") {
        let ms: u64 = arg.trim().parse().map_err(|_| format!("bad sleep duration: {arg}"))?;
        std::thread::sleep(std::time::Duration::from_millis(ms));
        return Ok(());
    }
    if stmt == "allocateHugeBuffer()" {
        // 64 MiB, kept alive for the rest of the process's life so the
        // parent's `ps -o rss` sample after this call observes it.
        leaks.push(vec![0u8; 64 * 1024 * 1024]);
        return Ok(());
    }
    if stmt == "exit" {
        std::process::exit(0);
    }
    if let Some(inner) = stmt.strip_prefix("setGlobal(").and_then(|rest| rest.strip_suffix(')')) {
        let (key_part, value_part) = inner.split_once(',').ok_or_else(|| format!("bad setGlobal args: {inner}"))?;
        let key = unquote(key_part.trim()).ok_or_else(|| format!("bad setGlobal key: {key_part}"))?;
        let expr = parse_expr(value_part).ok_or_else(|| format!("bad setGlobal value: {value_part}"))?;
        let value = expr_value(&expr, globals);
        globals.insert(key, value);
        return Ok(());
    }
    Err(format!("unrecognized statement: {stmt}"))
}

fn run(code: &str, globals: &mut HashMap<String, serde_json::Value>, leaks: &mut Vec<Vec<u8>>) -> RawReply {
    let mut stdout = String::new();
    let mut return_value = serde_json::Value::Null;

    for raw_stmt in code.split(';') {
        let stmt = raw_stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        if let Err(error_text) = run_statement(stmt, &mut stdout, &mut return_value, globals, leaks) {
            return RawReply::ParseError { error_text, status: EvalStatus::Break };
        }
    }

    RawReply::Ok { stdout, return_value, last_error: String::new(), status: EvalStatus::Continue }
}

fn main() -> io::Result<()> {
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut globals = HashMap::new();
    let mut leaks = Vec::new();

    loop {
        let Some(request) = read_frame(&mut stdin)? else {
            return Ok(());
        };
        let reply = run(&request.code, &mut globals, &mut leaks);
        write_frame(&mut stdout, &reply)?;
    }
}
