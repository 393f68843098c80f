//! Error types for testbed orchestration.
//!
//! This module provides error types using `thiserror` for ergonomic error
//! handling across the orchestration workflow.

use thiserror::Error;

/// Result type for orchestration operations.
pub type Result<T> = std::result::Result<T, WallError>;

/// Errors that can occur while driving the testbed.
#[derive(Debug, Error)]
pub enum WallError {
    /// Could not reach or authenticate to a remote host.
    #[error("connection to {host} failed: {reason}")]
    Connection {
        /// The host that could not be reached.
        host: String,
        /// The reason for the failure.
        reason: String,
    },

    /// A remote command exceeded its deadline.
    #[error("command on {host} timed out after {elapsed_ms}ms: {command}")]
    Timeout {
        /// The host the command was issued on.
        host: String,
        /// The command that was abandoned.
        command: String,
        /// Time spent before giving up, in milliseconds.
        elapsed_ms: u64,
    },

    /// The transport succeeded but the remote side produced a diagnostic
    /// that makes the result unusable.
    #[error("remote command on {host} failed: {detail}")]
    RemoteCommand {
        /// The host the command was issued on.
        host: String,
        /// Diagnostic output from the remote side.
        detail: String,
    },

    /// A remote query returned text that does not match its contract.
    #[error("failed to parse {context}")]
    Parse {
        /// What was being parsed (listing, status, topology map, ...).
        context: String,
        /// The raw text that could not be parsed, kept for diagnosis.
        raw: String,
    },

    /// The experiment name is already taken under the target project.
    #[error("experiment already exists: {0}")]
    AlreadyExists(String),

    /// A link endpoint could not be matched during discovery.
    #[error("unresolved endpoint for link {link} on node {node}")]
    Unresolved {
        /// The logical link identifier.
        link: String,
        /// The node the endpoint belongs to.
        node: String,
    },

    /// A topology or configuration value failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WallError {
    /// Creates a connection error.
    pub fn connection(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(host: impl Into<String>, command: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            host: host.into(),
            command: command.into(),
            elapsed_ms,
        }
    }

    /// Creates a remote command failure.
    pub fn remote_command(host: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::RemoteCommand {
            host: host.into(),
            detail: detail.into(),
        }
    }

    /// Creates a parse error carrying the offending text.
    pub fn parse(context: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Parse {
            context: context.into(),
            raw: raw.into(),
        }
    }

    /// Creates an unresolved-endpoint error.
    pub fn unresolved(link: impl Into<String>, node: impl Into<String>) -> Self {
        Self::Unresolved {
            link: link.into(),
            node: node.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Returns true if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }
}
