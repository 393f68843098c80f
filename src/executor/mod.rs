//! Remote command execution.
//!
//! Everything this crate does on the testbed goes through the
//! [`RemoteExecutor`] trait: the lifecycle manager talks to the ops server,
//! discovery and post-provisioning talk to the individual nodes. The trait
//! keeps the transport abstract; [`ssh::SshExecutor`] is the production
//! implementation, tests script their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod ssh;

pub use ssh::SshExecutor;

/// Captured output of a remote command.
///
/// Standard error is a diagnostic only; whether a call succeeded is decided
/// at the transport level, not from the remote shell's exit code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,

    /// Standard error from the command.
    pub stderr: String,
}

impl ExecOutput {
    /// Creates a new output value.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Returns stdout with surrounding whitespace removed.
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Returns true if the remote side produced diagnostic output.
    pub fn has_diagnostics(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// Transport-agnostic remote execution channel.
///
/// Implementations must be thread-safe; discovery and post-provisioning
/// fan calls out across nodes concurrently.
///
/// # Errors
///
/// A failed call returns a structured error ([`crate::WallError::Connection`],
/// [`crate::WallError::Timeout`]) instead of panicking; one failed remote
/// call must never take down a whole provisioning sweep.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs a single shell command on `host`.
    ///
    /// `timeout == None` blocks indefinitely; this is reserved for
    /// long-running provisioning commands such as experiment start.
    async fn execute(
        &self,
        host: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput>;

    /// Creates or overwrites `path` on `host` with `content`.
    ///
    /// The target file is made world-readable, -writable and -executable;
    /// the write truncates and replaces the whole file.
    async fn write_file(&self, host: &str, path: &str, content: &str) -> Result<()>;
}

/// A shared, dynamically dispatched executor.
pub type SharedExecutor = Arc<dyn RemoteExecutor>;
