//! Target hosts and the per-run credential.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

/// A switch to collect from, identified by hostname or address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TargetHost(String);

impl TargetHost {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetHost {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TargetHost {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Parse a host list: one host per line, blank lines and `#` comments ignored.
pub fn parse_host_list(text: &str) -> Vec<TargetHost> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(TargetHost::from)
        .collect()
}

/// Username + secret, captured once per run and shared read-only by every
/// host attempt. Cloning shares the same secret allocation.
#[derive(Clone)]
pub struct Credential {
    username: String,
    secret: Arc<SecretString>,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: SecretString) -> Self {
        Self {
            username: username.into(),
            secret: Arc::new(secret),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Borrow the secret. Callers must not log or persist the returned value.
    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
