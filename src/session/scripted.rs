//! Scripted transport for tests: each `open` consumes the next queued
//! script for that host and records what was written.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::CollectError;
use crate::session::{Session, SessionMode, SessionOutput, Transport};
use crate::target::{Credential, TargetHost};

pub(crate) enum Script {
    /// `open` fails with `ConnectFailure`.
    Fail(String),
    /// Session that exits with `output`. With `closed_input`, writes fail
    /// like a client that already exited; with `hang`, `finish` never returns.
    Run {
        output: SessionOutput,
        closed_input: bool,
        hang: bool,
    },
}

pub(crate) fn scripted_ok(stdout: &str, stderr: &str) -> Script {
    scripted_exit(0, stdout, stderr)
}

pub(crate) fn scripted_exit(code: i32, stdout: &str, stderr: &str) -> Script {
    Script::Run {
        output: SessionOutput {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        },
        closed_input: false,
        hang: false,
    }
}

/// Batch-mode refusal: input closed, non-zero exit, `stderr` as given.
pub(crate) fn scripted_refusal(stderr: &str) -> Script {
    Script::Run {
        output: SessionOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        },
        closed_input: true,
        hang: false,
    }
}

pub(crate) fn scripted_hang() -> Script {
    Script::Run {
        output: SessionOutput::default(),
        closed_input: false,
        hang: true,
    }
}

#[derive(Default)]
struct State {
    scripts: HashMap<TargetHost, VecDeque<Script>>,
    opens: Vec<(TargetHost, SessionMode)>,
    writes: HashMap<TargetHost, Vec<String>>,
    terminated: Vec<TargetHost>,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, host: &TargetHost, script: Script) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(host.clone())
            .or_default()
            .push_back(script);
    }

    pub(crate) fn opens(&self) -> Vec<(TargetHost, SessionMode)> {
        self.state.lock().unwrap().opens.clone()
    }

    pub(crate) fn writes(&self, host: &TargetHost) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .writes
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn terminated(&self) -> Vec<TargetHost> {
        self.state.lock().unwrap().terminated.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(
        &self,
        host: &TargetHost,
        _credential: &Credential,
        mode: SessionMode,
    ) -> crate::Result<Box<dyn Session>> {
        let script = {
            let mut state = self.state.lock().unwrap();
            state.opens.push((host.clone(), mode));
            state.scripts.get_mut(host).and_then(VecDeque::pop_front)
        };
        match script {
            None => Err(CollectError::ConnectFailure(
                host.to_string(),
                "no scripted session".into(),
            )),
            Some(Script::Fail(message)) => Err(CollectError::ConnectFailure(host.to_string(), message)),
            Some(Script::Run {
                output,
                closed_input,
                hang,
            }) => Ok(Box::new(ScriptedSession {
                host: host.clone(),
                state: self.state.clone(),
                output,
                closed_input,
                hang,
            })),
        }
    }
}

struct ScriptedSession {
    host: TargetHost,
    state: Arc<Mutex<State>>,
    output: SessionOutput,
    closed_input: bool,
    hang: bool,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn write_line(&mut self, text: &str) -> crate::Result<()> {
        if self.closed_input {
            return Err(CollectError::ConnectFailure(
                self.host.to_string(),
                "stdin write failed: Broken pipe".into(),
            ));
        }
        self.state
            .lock()
            .unwrap()
            .writes
            .entry(self.host.clone())
            .or_default()
            .push(text.to_string());
        Ok(())
    }

    async fn finish(&mut self) -> crate::Result<SessionOutput> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(self.output.clone())
    }

    async fn terminate(&mut self) -> crate::Result<()> {
        self.state.lock().unwrap().terminated.push(self.host.clone());
        Ok(())
    }
}
