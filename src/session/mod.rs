//! Remote-shell session management.
//!
//! A `Session` is one external remote-shell client process bound to one
//! switch. Its standard streams are always piped: stdout and stderr are
//! drained by independent tasks from the moment of spawn, and stdin is the
//! only sink. Commands are written one per line with a bare `\n` terminator,
//! since router shells read `\r\n` as two separate commands.
//!
//! `Transport` opens sessions. `PlinkTransport` is the production
//! implementation; tests substitute scripted transports.

pub mod plink;
pub mod trust;

#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;

use crate::target::{Credential, TargetHost};

pub use plink::{PlinkConfig, PlinkTransport};
pub use trust::{FixedPolicy, TrustDecision, TrustNegotiation, TrustPrompter, TrustState};

/// Line terminator written after every command.
pub const LINE_TERMINATOR: &str = "\n";

/// How the remote-shell client is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Batch flag prepended: the client refuses every interactive prompt.
    Batch,
    /// No batch flag: the client may ask about an unknown host key on stderr
    /// and read the answer from stdin.
    Interactive,
}

/// Everything a session produced, captured after the client exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutput {
    /// Process exit code; `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SessionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// One live remote-shell client process.
#[async_trait]
pub trait Session: Send {
    /// Write `text` followed by a single line feed.
    ///
    /// Fails when the client has already closed its input (for example a
    /// batch-mode client that refused an unknown host key and exited).
    async fn write_line(&mut self, text: &str) -> crate::Result<()>;

    /// Close stdin and block until the client exits, returning its output.
    async fn finish(&mut self) -> crate::Result<SessionOutput>;

    /// Kill the client and reap it. Used when a wait is abandoned.
    async fn terminate(&mut self) -> crate::Result<()>;
}

/// Opens sessions against target hosts.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        host: &TargetHost,
        credential: &Credential,
        mode: SessionMode,
    ) -> crate::Result<Box<dyn Session>>;
}
