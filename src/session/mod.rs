//! Host sessions
//!
//! A [`HostSession`] owns one authenticated transport to one host and
//! exposes the primitives the pipeline is built from. The executor only
//! sees the trait, so everything above this seam is testable without a
//! reachable host.

pub mod ssh;

use crate::error::Result;
use crate::models::{HostDescriptor, RemoteJob, MAX_OUTPUT_SIZE};
use std::path::Path;
use std::time::Duration;

/// Output of one remote command
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub output_truncated: bool,
}

/// One authenticated transport to one host. Sessions are never shared
/// between workers.
#[cfg_attr(test, mockall::automock)]
pub trait HostSession: Send {
    /// Establish the transport with the host's credential, bounded by
    /// the connection timeout.
    fn connect(&mut self) -> Result<()>;

    /// Idempotent "create directory if absent".
    fn ensure_remote_dir(&mut self, path: &str) -> Result<()>;

    /// Transfer a single local file to a remote path.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Run a command on the host, blocking for up to `timeout`.
    /// Exceeding the bound fails with the timeout error class and
    /// leaves the session closable.
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput>;

    /// Lightweight shell probe; `false` for a simply-absent file, never
    /// an error.
    fn exists(&mut self, remote: &str) -> Result<bool>;

    /// Transfer a single remote file to a local path, creating local
    /// parent directories as needed. The file vanishing between a probe
    /// and this call is a normal transfer failure.
    fn download(&mut self, remote: &str, local: &Path) -> Result<()>;

    /// Idempotent, infallible, invoked on every exit path.
    fn close(&mut self);
}

/// Creates one unconnected session per host
pub trait SessionFactory: Send + Sync {
    fn create(&self, host: &HostDescriptor, job: &RemoteJob) -> Box<dyn HostSession>;
}

/// Truncate command output to MAX_OUTPUT_SIZE
///
/// Returns (truncated_string, was_truncated)
pub(crate) fn truncate_output(data: &str) -> (String, bool) {
    let bytes = data.as_bytes();
    let truncated = bytes.len() > MAX_OUTPUT_SIZE;

    if truncated {
        let truncated_bytes = &bytes[..MAX_OUTPUT_SIZE];
        let output = String::from_utf8_lossy(truncated_bytes).to_string();
        (output, true)
    } else {
        (data.to_string(), false)
    }
}
