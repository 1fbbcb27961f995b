//! mactable configuration: deserialization and validation.
//!
//! ```toml
//! hosts = ["sw-core-1", "sw-acc-1"]
//!
//! [client]
//! executable = "plink"
//! args = ["-v", "-2"]
//! batch_flag = "-batch"
//!
//! [credential]
//! username = "netops"
//! password = "${SWITCH_PASSWORD}"
//!
//! [pacing]
//! command_delay_ms = 1000
//! trust_settle_ms = 3000
//! timeout_secs = 120
//!
//! [collect]
//! commands = ["show mac address-table | exclude -|CPU|Total|Address Table"]
//! parallel = 1
//! artifact_dir = "mactable-errors"
//! trust = "prompt"
//!
//! [liveness]
//! enabled = true
//! port = 22
//! timeout_ms = 1500
//! ```

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::driver::{DEFAULT_PAGING_COMMAND, DriverOptions};
use crate::error::CollectError;
use crate::fleet::{DEFAULT_MAC_COMMAND, FleetOptions};
use crate::liveness::LivenessCheck;
use crate::session::{PlinkConfig, TrustDecision};
use crate::target::TargetHost;

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` if the value is not a
/// valid env-var reference.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Resolve a `${VAR}` reference to a secret. Unset variables resolve to `None`.
pub fn resolve_secret_ref(value: &str) -> Option<SecretString> {
    let var_name = parse_env_ref(value)?;
    std::env::var(var_name).ok().map(SecretString::from)
}

/// Top-level mactable configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MactableConfig {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub credential: CredentialConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
}

/// Remote-shell client launch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default = "default_client_args")]
    pub args: Vec<String>,
    /// Set to `""` to never run in batch mode.
    #[serde(default = "default_batch_flag")]
    pub batch_flag: String,
}

/// Credential source. The password must be a `${VAR}` reference; literal
/// secrets are rejected by `validate()`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    /// Pause after each written command line.
    #[serde(default = "default_command_delay_ms")]
    pub command_delay_ms: u64,
    /// Pause after answering a host-key prompt.
    #[serde(default = "default_trust_settle_ms")]
    pub trust_settle_ms: u64,
    /// Watchdog on each session. Unset waits indefinitely.
    pub timeout_secs: Option<u64>,
}

/// How unknown host keys are handled.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TrustPolicy {
    /// Ask on the terminal for each unknown key.
    #[default]
    Prompt,
    AcceptOnce,
    AcceptAndCache,
    Reject,
}

impl TrustPolicy {
    /// Fixed decision for non-interactive policies; `None` for `Prompt`.
    pub fn fixed_decision(self) -> Option<TrustDecision> {
        match self {
            TrustPolicy::Prompt => None,
            TrustPolicy::AcceptOnce => Some(TrustDecision::AcceptOnce),
            TrustPolicy::AcceptAndCache => Some(TrustDecision::AcceptAndCache),
            TrustPolicy::Reject => Some(TrustDecision::Reject),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectConfig {
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,
    #[serde(default = "default_paging_command")]
    pub paging_command: String,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    #[serde(default)]
    pub trust: TrustPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_liveness_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_executable() -> String {
    "plink".to_string()
}

fn default_client_args() -> Vec<String> {
    vec!["-v".to_string(), "-2".to_string()]
}

fn default_batch_flag() -> String {
    "-batch".to_string()
}

fn default_command_delay_ms() -> u64 {
    1000
}

fn default_trust_settle_ms() -> u64 {
    3000
}

fn default_commands() -> Vec<String> {
    vec![DEFAULT_MAC_COMMAND.to_string()]
}

fn default_paging_command() -> String {
    DEFAULT_PAGING_COMMAND.to_string()
}

fn default_parallel() -> usize {
    1
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("mactable-errors")
}

fn default_ssh_port() -> u16 {
    22
}

fn default_liveness_timeout_ms() -> u64 {
    1500
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            args: default_client_args(),
            batch_flag: default_batch_flag(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            command_delay_ms: default_command_delay_ms(),
            trust_settle_ms: default_trust_settle_ms(),
            timeout_secs: None,
        }
    }
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            commands: default_commands(),
            paging_command: default_paging_command(),
            parallel: default_parallel(),
            artifact_dir: default_artifact_dir(),
            trust: TrustPolicy::default(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_ssh_port(),
            timeout_ms: default_liveness_timeout_ms(),
        }
    }
}

impl MactableConfig {
    /// Validate the config, failing fast before any host is contacted.
    pub fn validate(&self) -> crate::Result<()> {
        if self.client.executable.trim().is_empty() {
            return Err(CollectError::InvalidConfig(
                "client.executable must not be empty".to_string(),
            ));
        }

        if self.collect.commands.is_empty()
            || self.collect.commands.iter().any(|c| c.trim().is_empty())
        {
            return Err(CollectError::InvalidConfig(
                "collect.commands must list at least one non-empty command".to_string(),
            ));
        }

        if self.collect.parallel == 0 {
            return Err(CollectError::InvalidConfig(
                "collect.parallel must be at least 1".to_string(),
            ));
        }

        if let Some(username) = &self.credential.username {
            if username.trim().is_empty() {
                return Err(CollectError::InvalidConfig(
                    "credential.username must not be empty when set".to_string(),
                ));
            }
        }

        if let Some(password) = &self.credential.password {
            if parse_env_ref(password).is_none() {
                return Err(CollectError::InvalidConfig(
                    "credential.password must be a ${VAR} reference".to_string(),
                ));
            }
        }

        if self.liveness.enabled && self.liveness.timeout_ms == 0 {
            return Err(CollectError::InvalidConfig(
                "liveness.timeout_ms must be > 0 when liveness is enabled".to_string(),
            ));
        }

        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(CollectError::InvalidConfig(
                "hosts must not contain empty entries".to_string(),
            ));
        }

        Ok(())
    }

    pub fn target_hosts(&self) -> Vec<TargetHost> {
        self.hosts.iter().map(|h| TargetHost::from(h.trim())).collect()
    }

    pub fn plink_config(&self) -> PlinkConfig {
        let batch_flag = Some(self.client.batch_flag.clone()).filter(|f| !f.is_empty());
        PlinkConfig {
            executable: self.client.executable.clone(),
            args: self.client.args.clone(),
            batch_flag,
        }
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            paging_command: self.collect.paging_command.clone(),
            command_delay: Duration::from_millis(self.pacing.command_delay_ms),
            trust_settle: Duration::from_millis(self.pacing.trust_settle_ms),
            timeout: self.pacing.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn liveness_check(&self) -> Option<LivenessCheck> {
        self.liveness.enabled.then(|| LivenessCheck {
            port: self.liveness.port,
            timeout: Duration::from_millis(self.liveness.timeout_ms),
        })
    }

    pub fn fleet_options(&self) -> FleetOptions {
        FleetOptions {
            commands: self.collect.commands.clone(),
            parallel: self.collect.parallel,
            artifact_dir: Some(self.collect.artifact_dir.clone()),
            liveness: self.liveness_check(),
            driver: self.driver_options(),
        }
    }

    /// Password from the configured `${VAR}` reference, if set and present.
    pub fn resolve_password(&self) -> Option<SecretString> {
        self.credential
            .password
            .as_deref()
            .and_then(resolve_secret_ref)
    }
}
