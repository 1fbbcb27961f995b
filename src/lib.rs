//! mactable: switch MAC address table collector.
//! Drives one external remote-shell client per switch, negotiates unknown
//! host keys, issues CLI commands, parses the column-aligned output into
//! rows, and merges every host's rows into one report with per-host
//! failure isolation.

pub mod artifact;
pub mod config;
pub mod driver;
pub mod error;
pub mod fleet;
pub mod liveness;
pub mod parser;
pub mod session;
pub mod target;

pub use artifact::ArtifactWriter;
pub use config::{parse_env_ref, resolve_secret_ref, MactableConfig, TrustPolicy};
pub use driver::{CommandDriver, DriverOptions, RawTranscript};
pub use error::{CollectError, FailureKind, ParseWarning, Result};
pub use fleet::{FleetCollector, FleetOptions, HostFailure, HostWarning, Report};
pub use liveness::LivenessCheck;
pub use parser::{parse_transcript, ParsedOutput, TableRow};
pub use session::{
    FixedPolicy, PlinkConfig, PlinkTransport, Session, SessionMode, SessionOutput, Transport,
    TrustDecision, TrustPrompter,
};
pub use target::{parse_host_list, Credential, TargetHost};
