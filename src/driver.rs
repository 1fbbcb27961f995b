//! Command driver: feeds a command script through one session per attempt,
//! negotiates host-key trust when the batch attempt is refused, and returns
//! the raw transcript.
//!
//! Script written to every session, one line each with a pause after it:
//! paging-disable command, the caller's commands in order, then `exit`.
//! Router shells drop or reorder input sent without pacing.

use std::time::{Duration, Instant};

use crate::error::CollectError;
use crate::session::trust::{self, TrustNegotiation, TrustPrompter};
use crate::session::{Session, SessionMode, SessionOutput, Transport};
use crate::target::{Credential, TargetHost};

/// Paging-disable command sent before anything else.
pub const DEFAULT_PAGING_COMMAND: &str = "terminal length 0";

/// Command that ends the remote session cleanly.
pub const EXIT_COMMAND: &str = "exit";

/// Timing and framing knobs for the command script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    pub paging_command: String,
    /// Pause after every written line.
    pub command_delay: Duration,
    /// Quiet period after a host-key answer before the first command.
    pub trust_settle: Duration,
    /// Watchdog on the wait for client exit. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            paging_command: DEFAULT_PAGING_COMMAND.to_string(),
            command_delay: Duration::from_secs(1),
            trust_settle: Duration::from_secs(3),
            timeout: None,
        }
    }
}

/// Ordered stdout lines of one successful session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTranscript {
    lines: Vec<String>,
}

impl RawTranscript {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Drives one host's session(s) from open to exit.
pub struct CommandDriver<'a> {
    transport: &'a dyn Transport,
    prompter: &'a dyn TrustPrompter,
    options: &'a DriverOptions,
}

impl<'a> CommandDriver<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        prompter: &'a dyn TrustPrompter,
        options: &'a DriverOptions,
    ) -> Self {
        Self {
            transport,
            prompter,
            options,
        }
    }

    /// Run `commands` on `host` and return the transcript.
    ///
    /// # Failure policy
    /// - batch attempt abandoned without a host-key notice: `ConnectFailure`
    /// - host key rejected, or interactive attempt abandoned: `TrustRejected`
    /// - any other non-zero exit: `CommandFailure` with the stderr text
    ///
    /// Trust is negotiated at most once; the interactive retry is never
    /// itself retried.
    pub async fn run(
        &self,
        host: &TargetHost,
        credential: &Credential,
        commands: &[String],
    ) -> crate::Result<RawTranscript> {
        let start = Instant::now();

        let session = self
            .transport
            .open(host, credential, SessionMode::Batch)
            .await?;
        let mut output = self.feed(host, session, commands).await?;

        if trust::is_host_key_unknown(&output.stderr) && !output.success() {
            tracing::info!(host = %host, "host key not cached, negotiating trust");
            let mut negotiation = TrustNegotiation::new();
            negotiation
                .negotiate(self.prompter, host, &output.stderr)
                .await?;
            let session = negotiation
                .reopen(self.transport, host, credential, self.options.trust_settle)
                .await?;
            output = self.feed(host, session, commands).await?;

            if trust::is_abandoned(&output.stderr) {
                return Err(CollectError::TrustRejected(host.to_string(), output.stderr));
            }
        } else if trust::is_abandoned(&output.stderr) && !output.success() {
            return Err(CollectError::ConnectFailure(host.to_string(), output.stderr));
        }

        let exit_code = output.exit_code.unwrap_or(-1);
        tracing::info!(
            host = %host,
            exit_code = %exit_code,
            duration_ms = %start.elapsed().as_millis(),
            "remote-shell session finished"
        );
        if !output.stderr.is_empty() {
            tracing::debug!(host = %host, stderr = %output.stderr, "remote-shell stderr");
        }

        if !output.success() {
            let text = if output.stderr.trim().is_empty() {
                format!("remote-shell client exited with code {}", exit_code)
            } else {
                output.stderr
            };
            return Err(CollectError::CommandFailure(host.to_string(), text));
        }

        Ok(RawTranscript::from_text(&output.stdout))
    }

    /// Write the full script, then wait for exit. A write failure means the
    /// client is already gone; the remaining lines are skipped and its exit
    /// output is still collected.
    async fn feed(
        &self,
        host: &TargetHost,
        mut session: Box<dyn Session>,
        commands: &[String],
    ) -> crate::Result<SessionOutput> {
        let script = std::iter::once(self.options.paging_command.as_str())
            .chain(commands.iter().map(String::as_str))
            .chain(std::iter::once(EXIT_COMMAND));

        for line in script {
            if let Err(e) = session.write_line(line).await {
                tracing::debug!(host = %host, error = %e, "client closed input early");
                break;
            }
            tokio::time::sleep(self.options.command_delay).await;
        }

        let Some(limit) = self.options.timeout else {
            return session.finish().await;
        };
        match tokio::time::timeout(limit, session.finish()).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(host = %host, timeout_secs = %limit.as_secs(), "session watchdog expired");
                session.terminate().await?;
                Err(CollectError::Timeout(host.to_string(), limit.as_secs()))
            }
        }
    }
}
