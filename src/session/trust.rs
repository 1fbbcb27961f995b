//! Host-key trust negotiation.
//!
//! A batch-mode client refuses an unknown host key and exits with a
//! "host key is not cached" notice on stderr. Negotiation turns that notice
//! into a `TrustDecision` and, when the key is accepted, reopens the session
//! in interactive mode with the answer as the first bytes on stdin.
//!
//! State machine, at most one pass per host attempt:
//! `Unknown -> PromptUser -> Decided(AcceptOnce | AcceptAndCache | Reject)`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollectError;
use crate::session::{Session, SessionMode, Transport};
use crate::target::{Credential, TargetHost};

/// Lowercased stderr fragments announcing an unrecognized host key.
const HOST_KEY_UNKNOWN_MARKERS: &[&str] = &[
    "host key is not cached",
    "not cached in the registry",
    "host key is not cached for this server",
];

/// Lowercased text the client prints last when it gives up on a connection.
const ABANDONED_MARKER: &str = "connection abandoned";

/// True when stderr shows the client stopped at an unknown host key.
pub fn is_host_key_unknown(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    HOST_KEY_UNKNOWN_MARKERS.iter().any(|m| lower.contains(m))
}

/// True when the tail of stderr says the connection was abandoned.
pub fn is_abandoned(stderr: &str) -> bool {
    let tail = stderr.trim_end().trim_end_matches('.').to_lowercase();
    tail.ends_with(ABANDONED_MARKER)
}

/// Answer to an unknown host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustDecision {
    /// Connect this time without storing the key.
    AcceptOnce,
    /// Store the key in the client's cache and connect.
    AcceptAndCache,
    /// Do not connect; the host is recorded as failed.
    Reject,
}

impl TrustDecision {
    /// Text written to the client's stdin for this decision. `Reject` never
    /// reopens a session, so it has no answer.
    pub fn answer(self) -> Option<&'static str> {
        match self {
            TrustDecision::AcceptAndCache => Some("y"),
            TrustDecision::AcceptOnce => Some("n"),
            TrustDecision::Reject => None,
        }
    }
}

/// Source of trust decisions (a terminal prompt, or a fixed policy).
#[async_trait]
pub trait TrustPrompter: Send + Sync {
    /// Decide for `host`; `notice` is the client's stderr, including the
    /// key fingerprint.
    async fn decide(&self, host: &TargetHost, notice: &str) -> TrustDecision;
}

/// Non-interactive prompter that always returns the same decision.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub TrustDecision);

#[async_trait]
impl TrustPrompter for FixedPolicy {
    async fn decide(&self, host: &TargetHost, _notice: &str) -> TrustDecision {
        tracing::info!(host = %host, decision = ?self.0, "applying fixed host key policy");
        self.0
    }
}

/// Negotiation progress for one host attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustState {
    Unknown,
    PromptUser,
    Decided(TrustDecision),
}

/// One host attempt's trust negotiation.
#[derive(Debug)]
pub struct TrustNegotiation {
    state: TrustState,
}

impl Default for TrustNegotiation {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustNegotiation {
    pub fn new() -> Self {
        Self {
            state: TrustState::Unknown,
        }
    }

    pub fn state(&self) -> TrustState {
        self.state
    }

    /// Ask `prompter` for a decision. Rejection is returned as
    /// `TrustRejected`; a second negotiation on the same attempt is refused.
    pub async fn negotiate(
        &mut self,
        prompter: &dyn TrustPrompter,
        host: &TargetHost,
        notice: &str,
    ) -> crate::Result<TrustDecision> {
        if self.state != TrustState::Unknown {
            return Err(CollectError::TrustRejected(
                host.to_string(),
                "host key prompt repeated after a trust decision".into(),
            ));
        }
        self.state = TrustState::PromptUser;
        let decision = prompter.decide(host, notice).await;
        self.state = TrustState::Decided(decision);
        tracing::info!(host = %host, decision = ?decision, "host key trust decided");

        if decision == TrustDecision::Reject {
            return Err(CollectError::TrustRejected(host.to_string(), notice.to_string()));
        }
        Ok(decision)
    }

    /// Reopen the session interactively and feed the accepted decision,
    /// then hold off for `settle` before the caller writes anything else.
    ///
    /// A client that closed stdin before reading the answer is still
    /// returned; its exit output tells the caller what happened.
    pub async fn reopen(
        &self,
        transport: &dyn Transport,
        host: &TargetHost,
        credential: &Credential,
        settle: Duration,
    ) -> crate::Result<Box<dyn Session>> {
        let answer = match self.state {
            TrustState::Decided(decision) => decision.answer(),
            _ => None,
        };
        let Some(answer) = answer else {
            return Err(CollectError::TrustRejected(
                host.to_string(),
                "no accepted trust decision to apply".into(),
            ));
        };

        let mut session = transport
            .open(host, credential, SessionMode::Interactive)
            .await?;
        if let Err(e) = session.write_line(answer).await {
            tracing::debug!(host = %host, error = %e, "client closed input before trust answer");
        }
        tokio::time::sleep(settle).await;
        Ok(session)
    }
}
