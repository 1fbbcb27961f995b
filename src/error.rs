//! Error types for switch MAC table collection.

use serde::Serialize;
use thiserror::Error;

/// Main error type for mactable operations
#[derive(Error, Debug)]
pub enum CollectError {
    /// Invalid configuration, detected before any host is contacted
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Remote-shell client could not be started, or died before producing usable output
    #[error("connect failure for host '{0}': {1}")]
    ConnectFailure(String, String),

    /// Host key was rejected, or the client abandoned the connection after the trust prompt
    #[error("host key trust rejected for host '{0}': {1}")]
    TrustRejected(String, String),

    /// Non-zero exit from the remote-shell client not explained by trust negotiation
    #[error("command failure for host '{0}': {1}")]
    CommandFailure(String, String),

    /// Watchdog expired while waiting for the remote-shell client to exit
    #[error("session timeout for host '{0}' after {1}s")]
    Timeout(String, u64),

    /// Pre-flight liveness probe could not reach the host
    #[error("host '{0}' unreachable: {1}")]
    Unreachable(String, String),

    /// Local I/O error (artifact or report writing)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectError {
    /// Classify a host-fatal error for the report's failure set.
    ///
    /// Returns `None` for errors that are not tied to a single host.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CollectError::ConnectFailure(..) => Some(FailureKind::ConnectFailure),
            CollectError::TrustRejected(..) => Some(FailureKind::TrustRejected),
            CollectError::CommandFailure(..) => Some(FailureKind::CommandFailure),
            CollectError::Timeout(..) => Some(FailureKind::Timeout),
            CollectError::Unreachable(..) => Some(FailureKind::Unreachable),
            CollectError::InvalidConfig(_) | CollectError::Io(_) => None,
        }
    }

    /// Diagnostic text for the per-host artifact: the captured error-stream
    /// text where one exists, otherwise the error message itself.
    pub fn diagnostic_text(&self) -> String {
        match self {
            CollectError::ConnectFailure(_, text)
            | CollectError::TrustRejected(_, text)
            | CollectError::CommandFailure(_, text)
            | CollectError::Unreachable(_, text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Host-fatal failure categories recorded in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    ConnectFailure,
    TrustRejected,
    CommandFailure,
    Timeout,
    Unreachable,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::ConnectFailure => "connect-failure",
            FailureKind::TrustRejected => "trust-rejected",
            FailureKind::CommandFailure => "command-failure",
            FailureKind::Timeout => "timeout",
            FailureKind::Unreachable => "unreachable",
        };
        f.write_str(s)
    }
}

/// Non-fatal parse outcomes. These downgrade to warnings with partial or
/// empty rows and never fail the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ParseWarning {
    /// Transcript ended before the table for `command` was terminated by a prompt
    ParseTruncation { command: String, rows_kept: usize },
    /// Too little output after the login banner to contain any table
    EmptyOutput { lines: usize },
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseWarning::ParseTruncation { command, rows_kept } => write!(
                f,
                "output of '{}' truncated, kept {} row(s)",
                command, rows_kept
            ),
            ParseWarning::EmptyOutput { lines } => {
                write!(f, "no output ({} line(s) after banner)", lines)
            }
        }
    }
}

/// Result type alias for mactable operations
pub type Result<T> = std::result::Result<T, CollectError>;
