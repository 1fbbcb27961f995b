//! `plink`-style remote-shell client sessions over `tokio::process`.
//!
//! The client is launched with structured args (never a shell):
//! `[batch_flag] <args…> -pw <secret> <user>@<host>`. The argument vector
//! holding the secret is zeroized and the `Command` builder dropped as soon
//! as the child has been spawned.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use zeroize::Zeroize;

use crate::error::CollectError;
use crate::session::{LINE_TERMINATOR, Session, SessionMode, SessionOutput, Transport};
use crate::target::{Credential, TargetHost};

/// Launch parameters for the remote-shell client executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlinkConfig {
    /// Executable to run (e.g. `plink`, or a full path to `plink.exe`).
    pub executable: String,
    /// Flags placed before the credential arguments (verbosity, protocol version).
    pub args: Vec<String>,
    /// Flag prepended in `SessionMode::Batch`. `None` disables batch mode entirely.
    pub batch_flag: Option<String>,
}

impl Default for PlinkConfig {
    fn default() -> Self {
        Self {
            executable: "plink".to_string(),
            args: vec!["-v".to_string(), "-2".to_string()],
            batch_flag: Some("-batch".to_string()),
        }
    }
}

/// Build the full argument vector for one launch. Contains the secret.
fn build_args(
    config: &PlinkConfig,
    host: &TargetHost,
    credential: &Credential,
    mode: SessionMode,
) -> Vec<String> {
    let mut args = Vec::with_capacity(config.args.len() + 4);
    if mode == SessionMode::Batch {
        if let Some(flag) = &config.batch_flag {
            args.push(flag.clone());
        }
    }
    args.extend(config.args.iter().cloned());
    args.push("-pw".to_string());
    args.push(credential.expose_secret().to_string());
    args.push(format!("{}@{}", credential.username(), host));
    args
}

/// Drain a child pipe to completion on its own task.
fn spawn_drain<R>(mut reader: R) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    })
}

/// Await a drain task, decoding lossily. A failed drain yields empty text.
async fn collect_drain(
    handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    host: &str,
    stream: &str,
) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match handle.await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            tracing::warn!(host = %host, stream = %stream, error = %e, "pipe read error");
            String::new()
        }
        Err(e) => {
            tracing::warn!(host = %host, stream = %stream, error = %e, "pipe drain task failed");
            String::new()
        }
    }
}

/// Opens `PlinkSession`s.
#[derive(Debug, Clone, Default)]
pub struct PlinkTransport {
    config: PlinkConfig,
}

impl PlinkTransport {
    pub fn new(config: PlinkConfig) -> Self {
        Self { config }
    }

}

/// Spawn `executable` with piped stdio, then zeroize `args` whether or not
/// the spawn succeeded. `Command` keeps its own copy of the arguments, which
/// std gives no way to overwrite; it is dropped before returning.
fn spawn_scrubbed(executable: &str, args: &mut Vec<String>) -> std::io::Result<Child> {
    let mut cmd = Command::new(executable);
    cmd.args(args.iter())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let spawned = cmd.spawn();
    args.zeroize();
    drop(cmd);
    spawned
}

#[async_trait]
impl Transport for PlinkTransport {
    async fn open(
        &self,
        host: &TargetHost,
        credential: &Credential,
        mode: SessionMode,
    ) -> crate::Result<Box<dyn Session>> {
        let mut args = build_args(&self.config, host, credential, mode);

        let mut child = spawn_scrubbed(&self.config.executable, &mut args).map_err(|e| {
            CollectError::ConnectFailure(
                host.to_string(),
                format!("failed to spawn '{}': {}", self.config.executable, e),
            )
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            CollectError::ConnectFailure(host.to_string(), "failed to open stdin pipe".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            CollectError::ConnectFailure(host.to_string(), "failed to open stdout pipe".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            CollectError::ConnectFailure(host.to_string(), "failed to open stderr pipe".into())
        })?;

        tracing::debug!(
            host = %host,
            executable = %self.config.executable,
            mode = ?mode,
            pid = ?child.id(),
            "remote-shell client started"
        );

        Ok(Box::new(PlinkSession {
            host: host.to_string(),
            child,
            stdin: Some(stdin),
            stdout: Some(spawn_drain(stdout)),
            stderr: Some(spawn_drain(stderr)),
        }))
    }
}

/// A running remote-shell client process.
pub struct PlinkSession {
    host: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    stderr: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
}

#[async_trait]
impl Session for PlinkSession {
    async fn write_line(&mut self, text: &str) -> crate::Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            CollectError::ConnectFailure(self.host.clone(), "stdin already closed".into())
        })?;
        let mut line = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        line.push_str(text);
        line.push_str(LINE_TERMINATOR);
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| {
            CollectError::ConnectFailure(self.host.clone(), format!("stdin write failed: {}", e))
        })
    }

    async fn finish(&mut self) -> crate::Result<SessionOutput> {
        // EOF on stdin lets a client that ignored `exit` wind down as well.
        drop(self.stdin.take());

        let status = self.child.wait().await.map_err(|e| {
            CollectError::ConnectFailure(self.host.clone(), format!("process wait error: {}", e))
        })?;

        let stdout = collect_drain(self.stdout.take(), &self.host, "stdout").await;
        let stderr = collect_drain(self.stderr.take(), &self.host, "stderr").await;

        Ok(SessionOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }

    async fn terminate(&mut self) -> crate::Result<()> {
        drop(self.stdin.take());
        if let Err(e) = self.child.kill().await {
            tracing::warn!(host = %self.host, error = %e, "failed to kill remote-shell client");
        }
        for handle in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            handle.abort();
        }
        Ok(())
    }
}
