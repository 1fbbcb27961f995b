//! mactable: collect MAC address tables from switches over a remote-shell client.
//!
//! Two subcommands:
//! - `mactable collect`: run the configured commands on every host and emit a JSON report
//! - `mactable parse`: parse a saved transcript offline

mod prompt;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use mactable::fleet::DEFAULT_MAC_COMMAND;
use mactable::{
    parse_host_list, parse_transcript, Credential, FixedPolicy, FleetCollector, MactableConfig,
    PlinkTransport, RawTranscript, Report, TargetHost, TrustPolicy, TrustPrompter,
};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::prompt::TerminalPrompter;

/// mactable: switch MAC address table collector.
#[derive(Parser)]
#[command(
    name = "mactable",
    version,
    about = "Collect MAC address tables from switches over a remote-shell client"
)]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect tables from every host and write a JSON report
    Collect {
        /// Hosts to collect from (added to config and --hosts-file hosts)
        hosts: Vec<String>,
        /// File with one host per line (# comments allowed)
        #[arg(long)]
        hosts_file: Option<PathBuf>,
        /// Path to mactable.toml [default: ./mactable.toml or ~/.config/mactable/mactable.toml]
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Login username (overrides config)
        #[arg(short, long)]
        user: Option<String>,
        /// Environment variable holding the password (overrides config)
        #[arg(long)]
        password_env: Option<String>,
        /// Host key policy (overrides config)
        #[arg(long, value_enum)]
        trust: Option<TrustArg>,
        /// Hosts in flight at once (overrides config)
        #[arg(long)]
        parallel: Option<usize>,
        /// Remote command to run; repeat for several (overrides config)
        #[arg(long = "command")]
        commands: Vec<String>,
        /// Directory for per-host error files (overrides config)
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse a saved session transcript into rows
    Parse {
        /// Transcript file
        file: PathBuf,
        /// Host to attribute rows to
        #[arg(long)]
        host: String,
        /// Commands in the order they were issued [default: MAC table command]
        #[arg(long = "command")]
        commands: Vec<String>,
        /// Write rows here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TrustArg {
    Prompt,
    AcceptOnce,
    AcceptAndCache,
    Reject,
}

impl From<TrustArg> for TrustPolicy {
    fn from(arg: TrustArg) -> Self {
        match arg {
            TrustArg::Prompt => TrustPolicy::Prompt,
            TrustArg::AcceptOnce => TrustPolicy::AcceptOnce,
            TrustArg::AcceptAndCache => TrustPolicy::AcceptAndCache,
            TrustArg::Reject => TrustPolicy::Reject,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();

    // Ctrl-C handler: stop scheduling new hosts
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Interrupted, finishing hosts already in flight...");
        cancel_for_signal.cancel();
    });

    match cli.command {
        Commands::Collect {
            hosts,
            hosts_file,
            config,
            user,
            password_env,
            trust,
            parallel,
            commands,
            artifact_dir,
            output,
        } => {
            let mut config = load_config(resolve_config(config)).await?;
            if let Some(user) = user {
                config.credential.username = Some(user);
            }
            if let Some(trust) = trust {
                config.collect.trust = trust.into();
            }
            if let Some(parallel) = parallel {
                config.collect.parallel = parallel;
            }
            if !commands.is_empty() {
                config.collect.commands = commands;
            }
            if let Some(dir) = artifact_dir {
                config.collect.artifact_dir = dir;
            }
            config
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

            let targets = gather_hosts(&config, &hosts, hosts_file.as_deref()).await?;
            if targets.is_empty() {
                return Err(anyhow::anyhow!(
                    "No hosts given. Pass hosts as arguments, use --hosts-file, or set `hosts` in the config."
                ));
            }

            let credential = resolve_credential(&config, password_env.as_deref()).await?;
            let report = run_collect(config, targets, credential, cancel).await;

            write_json(&report, output.as_deref()).await?;
            print_summary(&report);
            Ok(if report.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Parse {
            file,
            host,
            commands,
            output,
        } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read transcript {:?}: {}", file, e))?;
            let commands = if commands.is_empty() {
                vec![DEFAULT_MAC_COMMAND.to_string()]
            } else {
                commands
            };
            let host = TargetHost::from(host);
            let parsed = parse_transcript(&host, &RawTranscript::from_text(&text), &commands);
            for warning in &parsed.warnings {
                tracing::warn!(host = %host, warning = %warning, "parse warning");
            }
            write_json(&parsed.rows, output.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Build the transport and prompter from config and collect from every host.
async fn run_collect(
    config: MactableConfig,
    targets: Vec<TargetHost>,
    credential: Credential,
    cancel: CancellationToken,
) -> Report {
    let transport = Arc::new(PlinkTransport::new(config.plink_config()));
    let prompter: Arc<dyn TrustPrompter> = match config.collect.trust.fixed_decision() {
        Some(decision) => Arc::new(FixedPolicy(decision)),
        None => Arc::new(TerminalPrompter::default()),
    };
    let collector = FleetCollector::new(transport, prompter, config.fleet_options())
        .with_cancellation(cancel);
    collector.collect(&targets, &credential).await
}

/// Merge hosts from the config, the hosts file, and the command line, in that order.
async fn gather_hosts(
    config: &MactableConfig,
    args: &[String],
    hosts_file: Option<&Path>,
) -> Result<Vec<TargetHost>> {
    let mut hosts = config.target_hosts();
    if let Some(path) = hosts_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read hosts file {:?}: {}", path, e))?;
        hosts.extend(parse_host_list(&text));
    }
    hosts.extend(
        args.iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(TargetHost::from),
    );
    Ok(hosts)
}

/// Username from config/flags; password from `--password-env`, the config's
/// `${VAR}` reference, or an interactive prompt, in that order.
async fn resolve_credential(
    config: &MactableConfig,
    password_env: Option<&str>,
) -> Result<Credential> {
    let username = config.credential.username.clone().ok_or_else(|| {
        anyhow::anyhow!("No username. Use --user or set credential.username in the config.")
    })?;

    let from_env = match password_env {
        Some(var) => Some(
            std::env::var(var)
                .map(SecretString::from)
                .map_err(|_| anyhow::anyhow!("Environment variable {} is not set", var))?,
        ),
        None => config.resolve_password(),
    };

    let secret = match from_env {
        Some(secret) => secret,
        None => {
            let prompt = format!("Password for {}: ", username);
            let entered = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
                .await
                .map_err(|e| anyhow::anyhow!("Password prompt failed: {}", e))?
                .map_err(|e| anyhow::anyhow!("Password prompt failed: {}", e))?;
            SecretString::from(entered)
        }
    };

    Ok(Credential::new(username, secret))
}

/// Resolve config file path: explicit flag → ./mactable.toml → ~/.config/mactable/mactable.toml.
/// `None` means run on defaults.
fn resolve_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if explicit.is_some() {
        return explicit;
    }

    let local = Path::new("mactable.toml");
    if local.exists() {
        return Some(local.to_path_buf());
    }

    dirs::config_dir()
        .map(|dir| dir.join("mactable").join("mactable.toml"))
        .filter(|path| path.exists())
}

/// Load and parse a mactable.toml config file, or defaults when none was found.
async fn load_config(config_path: Option<PathBuf>) -> Result<MactableConfig> {
    let Some(config_path) = config_path else {
        tracing::debug!("no config file found, using defaults");
        return Ok(MactableConfig::default());
    };
    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", config_path, e))?;
    let config: MactableConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {:?}: {}", config_path, e))?;
    tracing::debug!(path = %config_path.display(), "config loaded");
    Ok(config)
}

/// Pretty JSON to `path`, or stdout.
async fn write_json<T: serde::Serialize>(value: &T, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?;
    match path {
        Some(path) => tokio::fs::write(path, json + "\n")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {:?}: {}", path, e))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn print_summary(report: &Report) {
    eprintln!(
        "{} row(s) from {} host(s); {} failed, {} empty, {} skipped",
        report.rows.len(),
        report.contributing_hosts().len(),
        report.failures.len(),
        report.empty_hosts.len(),
        report.skipped.len(),
    );
    for failure in &report.failures {
        match &failure.artifact {
            Some(path) => eprintln!("  FAILED {} ({}): see {}", failure.host, failure.kind, path.display()),
            None => eprintln!("  FAILED {} ({}): {}", failure.host, failure.kind, failure.message),
        }
    }
}
