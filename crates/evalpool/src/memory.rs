//! External memory sampling via `ps`.
//!
//! Resident set size is measured by shelling out to `ps` rather than
//! trusting the subprocess to report its own usage — a worker running
//! away with memory is exactly the case where self-reporting cannot be
//! trusted.

use tokio::process::Command;

use crate::error::{PoolError, Result};

/// Returns the resident set size of `pid`, in KiB, by invoking
/// `ps -o rss= -p <pid>` and parsing its output.
pub async fn sample_rss_kib(pid: u32) -> Result<u64> {
    let output = Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .await?;

    if !output.status.success() {
        return Err(PoolError::Io(std::io::Error::other(format!(
            "ps exited with status {}",
            output.status
        ))));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    text.trim()
        .parse::<u64>()
        .map_err(|_| PoolError::Io(std::io::Error::other(format!("unparseable ps output: {text:?}"))))
}
