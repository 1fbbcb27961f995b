//! Fleet aggregator: runs the command driver and parser for every target
//! host and merges the results into one `Report`.
//!
//! Host-fatal errors are caught per host: the host lands in the failure set
//! with a diagnostic artifact, and the batch moves on. Hosts run one at a
//! time unless `parallel > 1`, in which case up to `parallel` sessions are in
//! flight; each session's reads and writes stay with its own process, and the
//! report keeps input order either way.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactWriter;
use crate::driver::{CommandDriver, DriverOptions};
use crate::error::{CollectError, FailureKind, ParseWarning};
use crate::liveness::LivenessCheck;
use crate::parser::{ParsedOutput, TableRow, parse_transcript};
use crate::session::{Transport, TrustPrompter};
use crate::target::{Credential, TargetHost};

/// MAC table dump with banner, separator and footer lines filtered switch-side.
pub const DEFAULT_MAC_COMMAND: &str =
    "show mac address-table | exclude -|CPU|Total|Address Table";

/// What to run and how.
#[derive(Debug, Clone)]
pub struct FleetOptions {
    /// Commands issued on every host, in order.
    pub commands: Vec<String>,
    /// Maximum hosts in flight. 1 is strictly sequential.
    pub parallel: usize,
    /// Where per-host diagnostic artifacts go. `None` disables them.
    pub artifact_dir: Option<PathBuf>,
    /// Pre-flight reachability probe. `None` skips it.
    pub liveness: Option<LivenessCheck>,
    pub driver: DriverOptions,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            commands: vec![DEFAULT_MAC_COMMAND.to_string()],
            parallel: 1,
            artifact_dir: None,
            liveness: None,
            driver: DriverOptions::default(),
        }
    }
}

/// A host that produced no rows because of a host-fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostFailure {
    pub host: TargetHost,
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

/// A non-fatal parse warning attributed to its host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostWarning {
    pub host: TargetHost,
    #[serde(flatten)]
    pub warning: ParseWarning,
}

/// Merged result of one collection run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// Rows from every successful host, in host order then transcript order.
    pub rows: Vec<TableRow>,
    pub failures: Vec<HostFailure>,
    pub warnings: Vec<HostWarning>,
    /// Hosts that ran cleanly but produced no rows.
    pub empty_hosts: Vec<TargetHost>,
    /// Hosts never attempted because the run was cancelled.
    pub skipped: Vec<TargetHost>,
}

impl Report {
    /// Hosts that contributed at least one row, in first-seen order.
    pub fn contributing_hosts(&self) -> Vec<&TargetHost> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .map(|r| &r.host)
            .filter(|h| seen.insert(*h))
            .collect()
    }

    pub fn failed_hosts(&self) -> Vec<&TargetHost> {
        self.failures.iter().map(|f| &f.host).collect()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

enum HostOutcome {
    Parsed(ParsedOutput),
    Failed(HostFailure),
    Skipped,
}

/// Drives collection across a list of hosts.
pub struct FleetCollector {
    transport: Arc<dyn Transport>,
    prompter: Arc<dyn TrustPrompter>,
    options: FleetOptions,
    artifacts: Option<ArtifactWriter>,
    cancel: CancellationToken,
}

impl FleetCollector {
    pub fn new(
        transport: Arc<dyn Transport>,
        prompter: Arc<dyn TrustPrompter>,
        options: FleetOptions,
    ) -> Self {
        let artifacts = options.artifact_dir.clone().map(ArtifactWriter::new);
        Self {
            transport,
            prompter,
            options,
            artifacts,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop starting new hosts once `cancel` fires. Hosts already in flight
    /// run to completion.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Collect from every host. Never fails as a whole: per-host errors are
    /// recorded in `Report::failures`. Duplicate hosts are collected once.
    pub async fn collect(&self, hosts: &[TargetHost], credential: &Credential) -> Report {
        let start = Instant::now();

        let mut seen = HashSet::new();
        let hosts: Vec<&TargetHost> = hosts
            .iter()
            .filter(|h| {
                let fresh = seen.insert(*h);
                if !fresh {
                    tracing::warn!(host = %h, "duplicate host ignored");
                }
                fresh
            })
            .collect();
        let total = hosts.len();
        let parallel = self.options.parallel.max(1);

        tracing::info!(
            hosts = %total,
            parallel = %parallel,
            commands = ?self.options.commands,
            "starting MAC table collection"
        );

        let outcomes: Vec<(TargetHost, HostOutcome)> = stream::iter(hosts.into_iter().enumerate())
            .map(|(index, host)| async move {
                let outcome = self.collect_host(index, total, host, credential).await;
                (host.clone(), outcome)
            })
            .buffered(parallel)
            .collect()
            .await;

        let mut report = Report::default();
        for (host, outcome) in outcomes {
            match outcome {
                HostOutcome::Parsed(parsed) => {
                    for warning in parsed.warnings {
                        tracing::warn!(host = %host, warning = %warning, "parse warning");
                        report.warnings.push(HostWarning {
                            host: host.clone(),
                            warning,
                        });
                    }
                    if parsed.rows.is_empty() {
                        report.empty_hosts.push(host);
                    } else {
                        report.rows.extend(parsed.rows);
                    }
                }
                HostOutcome::Failed(failure) => report.failures.push(failure),
                HostOutcome::Skipped => report.skipped.push(host),
            }
        }

        if let Some(writer) = &self.artifacts {
            match writer.write_failure_index(&report.failures).await {
                Ok(Some(path)) => {
                    tracing::info!(path = %path.display(), "failed host list written");
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "could not write failed host list"),
            }
        }

        tracing::info!(
            rows = %report.rows.len(),
            failed = %report.failures.len(),
            empty = %report.empty_hosts.len(),
            skipped = %report.skipped.len(),
            duration_ms = %start.elapsed().as_millis(),
            "collection finished"
        );

        report
    }

    async fn collect_host(
        &self,
        index: usize,
        total: usize,
        host: &TargetHost,
        credential: &Credential,
    ) -> HostOutcome {
        if self.cancel.is_cancelled() {
            tracing::info!(host = %host, "cancelled before start, skipping");
            return HostOutcome::Skipped;
        }
        tracing::info!(host = %host, progress = %format!("{}/{}", index + 1, total), "collecting");

        match self.run_host(host, credential).await {
            Ok(parsed) => {
                tracing::info!(host = %host, rows = %parsed.rows.len(), "host done");
                HostOutcome::Parsed(parsed)
            }
            Err(err) => HostOutcome::Failed(self.record_failure(host, err).await),
        }
    }

    async fn run_host(&self, host: &TargetHost, credential: &Credential) -> crate::Result<ParsedOutput> {
        if let Some(check) = &self.options.liveness {
            check.probe(host).await?;
        }
        let driver = CommandDriver::new(
            self.transport.as_ref(),
            self.prompter.as_ref(),
            &self.options.driver,
        );
        let transcript = driver.run(host, credential, &self.options.commands).await?;
        Ok(parse_transcript(host, &transcript, &self.options.commands))
    }

    async fn record_failure(&self, host: &TargetHost, err: CollectError) -> HostFailure {
        let kind = err.failure_kind().unwrap_or(FailureKind::CommandFailure);
        let artifact = match &self.artifacts {
            Some(writer) => match writer.write_host_error(host, &err.diagnostic_text()).await {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "could not write diagnostic artifact");
                    None
                }
            },
            None => None,
        };
        tracing::warn!(host = %host, kind = %kind, error = %err, "host failed");
        HostFailure {
            host: host.clone(),
            kind,
            message: err.to_string(),
            artifact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::scripted::{Script, ScriptedTransport, scripted_exit, scripted_ok, scripted_refusal};
    use crate::session::{FixedPolicy, SessionMode, TrustDecision};
    use secrecy::SecretString;
    use std::time::Duration;

    const COMMAND: &str = "show mac address-table";

    fn mac_transcript(prompt: &str, rows: usize) -> String {
        let mut out = format!(
            "Using username \"netops\".\n{p}>terminal length 0\n{p}>{c}\nVlan    Mac Address       Type        Ports\n",
            p = prompt,
            c = COMMAND
        );
        for i in 0..rows {
            out.push_str(&format!("10      0000.0000.{:04x}    DYNAMIC     Gi1/0/{}\n", i, i));
        }
        out.push_str(&format!("{}>exit\n", prompt));
        out
    }

    fn options(artifact_dir: Option<PathBuf>) -> FleetOptions {
        FleetOptions {
            commands: vec![COMMAND.to_string()],
            artifact_dir,
            driver: DriverOptions {
                command_delay: Duration::ZERO,
                trust_settle: Duration::ZERO,
                ..DriverOptions::default()
            },
            ..FleetOptions::default()
        }
    }

    fn collector(transport: &ScriptedTransport, options: FleetOptions) -> FleetCollector {
        FleetCollector::new(
            Arc::new(transport.clone()),
            Arc::new(FixedPolicy(TrustDecision::AcceptOnce)),
            options,
        )
    }

    fn credential() -> Credential {
        Credential::new("netops", SecretString::from("pw"))
    }

    fn hosts(names: &[&str]) -> Vec<TargetHost> {
        names.iter().map(|n| TargetHost::from(*n)).collect()
    }

    #[tokio::test]
    async fn test_failing_hosts_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new();
        let targets = hosts(&["sw1", "sw2", "sw3", "sw4"]);
        transport.push(&targets[0], scripted_ok(&mac_transcript("sw1", 2), ""));
        transport.push(&targets[1], scripted_exit(1, "", "FATAL ERROR: Configured password was not accepted\n"));
        transport.push(&targets[2], scripted_ok(&mac_transcript("sw3", 3), ""));
        transport.push(&targets[3], Script::Fail("failed to spawn 'plink'".into()));

        let report = collector(&transport, options(Some(tmp.path().to_path_buf())))
            .collect(&targets, &credential())
            .await;

        assert_eq!(report.rows.len(), 5);
        assert_eq!(report.contributing_hosts(), vec![&targets[0], &targets[2]]);
        assert_eq!(report.failed_hosts(), vec![&targets[1], &targets[3]]);
        assert_eq!(report.failures[0].kind, FailureKind::CommandFailure);
        assert_eq!(report.failures[1].kind, FailureKind::ConnectFailure);

        let artifact = report.failures[0].artifact.as_ref().unwrap();
        let text = std::fs::read_to_string(artifact).unwrap();
        assert!(text.contains("password was not accepted"));
        assert!(tmp.path().join(crate::artifact::FAILURE_INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn test_clean_rerun_drops_stale_failure_index() {
        let tmp = tempfile::tempdir().unwrap();
        let index = tmp.path().join(crate::artifact::FAILURE_INDEX_FILE);
        let targets = hosts(&["sw1"]);

        let failing = ScriptedTransport::new();
        failing.push(&targets[0], scripted_exit(1, "", "FATAL ERROR: Network error: Connection refused\n"));
        let first = collector(&failing, options(Some(tmp.path().to_path_buf())))
            .collect(&targets, &credential())
            .await;
        assert!(first.has_failures());
        assert!(std::fs::read_to_string(&index).unwrap().starts_with("sw1\t"));

        let healthy = ScriptedTransport::new();
        healthy.push(&targets[0], scripted_ok(&mac_transcript("sw1", 1), ""));
        let second = collector(&healthy, options(Some(tmp.path().to_path_buf())))
            .collect(&targets, &credential())
            .await;
        assert_eq!(second.rows.len(), 1);
        assert!(!second.has_failures());
        assert!(!index.exists());
    }

    #[tokio::test]
    async fn test_rows_carry_their_host() {
        let transport = ScriptedTransport::new();
        let targets = hosts(&["10.0.0.1", "10.0.0.2"]);
        transport.push(&targets[0], scripted_ok(&mac_transcript("sw-a", 1), ""));
        transport.push(&targets[1], scripted_ok(&mac_transcript("sw-b", 4), ""));

        let report = collector(&transport, options(None))
            .collect(&targets, &credential())
            .await;

        assert_eq!(report.rows.iter().filter(|r| r.host == targets[0]).count(), 1);
        assert_eq!(report.rows.iter().filter(|r| r.host == targets[1]).count(), 4);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_run_keeps_host_order() {
        let transport = ScriptedTransport::new();
        let targets = hosts(&["sw1", "sw2", "sw3", "sw4", "sw5"]);
        for (i, host) in targets.iter().enumerate() {
            transport.push(host, scripted_ok(&mac_transcript(host.as_str(), i + 1), ""));
        }
        let mut opts = options(None);
        opts.parallel = 3;

        let report = collector(&transport, opts).collect(&targets, &credential()).await;

        let order: Vec<&TargetHost> = report.contributing_hosts();
        assert_eq!(order, targets.iter().collect::<Vec<_>>());
        assert_eq!(report.rows.len(), 15);
    }

    #[tokio::test]
    async fn test_trust_negotiated_host_contributes_rows() {
        let transport = ScriptedTransport::new();
        let targets = hosts(&["sw1"]);
        transport.push(
            &targets[0],
            scripted_refusal("The host key is not cached for this server:\nConnection abandoned.\n"),
        );
        transport.push(&targets[0], scripted_ok(&mac_transcript("sw1", 2), ""));

        let report = collector(&transport, options(None))
            .collect(&targets, &credential())
            .await;

        assert_eq!(report.rows.len(), 2);
        assert_eq!(
            transport.opens(),
            vec![
                (targets[0].clone(), SessionMode::Batch),
                (targets[0].clone(), SessionMode::Interactive),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_output_host_is_neither_row_nor_failure() {
        let transport = ScriptedTransport::new();
        let targets = hosts(&["sw1"]);
        transport.push(&targets[0], scripted_ok("Using username \"netops\".\nsw1>exit\n", ""));

        let report = collector(&transport, options(None))
            .collect(&targets, &credential())
            .await;

        assert!(report.rows.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.empty_hosts, targets);
        assert!(matches!(
            report.warnings[0].warning,
            ParseWarning::EmptyOutput { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_hosts() {
        let transport = ScriptedTransport::new();
        let targets = hosts(&["sw1", "sw2"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = collector(&transport, options(None))
            .with_cancellation(cancel)
            .collect(&targets, &credential())
            .await;

        assert_eq!(report.skipped, targets);
        assert!(transport.opens().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_never_spawns_client() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = ScriptedTransport::new();
        let targets = hosts(&["127.0.0.1"]);
        let mut opts = options(None);
        opts.liveness = Some(LivenessCheck {
            port,
            timeout: Duration::from_secs(2),
        });

        let report = collector(&transport, opts).collect(&targets, &credential()).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Unreachable);
        assert!(transport.opens().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_hosts_collected_once() {
        let transport = ScriptedTransport::new();
        let targets = hosts(&["sw1", "sw1"]);
        transport.push(&targets[0], scripted_ok(&mac_transcript("sw1", 1), ""));

        let report = collector(&transport, options(None))
            .collect(&targets, &credential())
            .await;

        assert_eq!(report.rows.len(), 1);
        assert!(report.failures.is_empty());
        assert_eq!(transport.opens().len(), 1);
    }

    #[tokio::test]
    async fn test_report_serializes_flat_rows() {
        let transport = ScriptedTransport::new();
        let targets = hosts(&["switch1"]);
        transport.push(&targets[0], scripted_ok(&mac_transcript("switch1", 1), ""));

        let report = collector(&transport, options(None))
            .collect(&targets, &credential())
            .await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(
            json["rows"][0],
            serde_json::json!({
                "Vlan": "10",
                "Mac Address": "0000.0000.0000",
                "Type": "DYNAMIC",
                "Ports": "Gi1/0/0",
                "hostname": "switch1"
            })
        );
        assert_eq!(json["failures"], serde_json::json!([]));
    }
}
