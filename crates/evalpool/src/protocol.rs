//! Wire contract spoken to an interpreter subprocess, and the outcome
//! type surfaced to clients of the pool.
//!
//! Framing is length-prefixed: a 4-byte big-endian `u32` byte count
//! followed by that many bytes of UTF-8 JSON. The interpreter subprocess
//! itself is out of scope — only this contract is pinned.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Request frame written to a worker subprocess's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRequest {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_mem_kib: Option<u64>,
}

/// Post-evaluation survival signal: whether the evaluator's state can be
/// trusted to persist into the next call on the same worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvalStatus {
    Continue,
    Break,
}

/// Why a worker subprocess is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExitReason {
    /// The subprocess exited with the given status code.
    Code(i32),
    /// The evaluation's timeout elapsed before a reply arrived.
    Timeout,
}

/// Reply frame read from a worker subprocess's stdout, tagged the way the
/// corpus tags result enums for serde round-tripping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "camelCase")]
pub enum RawReply {
    Ok {
        stdout: String,
        return_value: serde_json::Value,
        last_error: String,
        status: EvalStatus,
    },
    ParseError {
        error_text: String,
        status: EvalStatus,
    },
    Exit {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        #[serde(default)]
        timeout: bool,
    },
}

/// The outcome of an evaluation as observed by a pool client. Distinct
/// from [`RawReply`] so that worker-stub-internal exits (subprocess death,
/// enforced timeout) collapse onto the same shape regardless of whether
/// the subprocess itself produced an `exit` frame or simply vanished.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "tag", rename_all = "camelCase")]
pub enum EvalOutcome {
    Ok {
        stdout: String,
        return_value: serde_json::Value,
        last_error: String,
        status: EvalStatus,
    },
    ParseError {
        error_text: String,
        status: EvalStatus,
    },
    Exit { reason: ExitReason },
}

impl From<RawReply> for EvalOutcome {
    fn from(raw: RawReply) -> Self {
        match raw {
            RawReply::Ok { stdout, return_value, last_error, status } => {
                EvalOutcome::Ok { stdout, return_value, last_error, status }
            }
            RawReply::ParseError { error_text, status } => {
                EvalOutcome::ParseError { error_text, status }
            }
            RawReply::Exit { code, timeout } => EvalOutcome::Exit {
                reason: if timeout {
                    ExitReason::Timeout
                } else {
                    ExitReason::Code(code.unwrap_or(-1))
                },
            },
        }
    }
}

/// Writes one length-prefixed JSON frame.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    value: &impl Serialize,
) -> io::Result<()> {
    let body = serde_json::to_vec(value).map_err(io::Error::other)?;
    let len = u32::try_from(body.len())
        .map_err(|_| io::Error::other("frame too large"))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

/// Reads one length-prefixed JSON frame, deserializing it as `T`.
pub async fn read_frame<R: AsyncReadExt + Unpin, T: for<'de> Deserialize<'de>>(
    reader: &mut R,
) -> io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(io::Error::other)
}
