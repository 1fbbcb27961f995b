//! Per-host diagnostic artifacts.
//!
//! Each permanently failed host gets `<dir>/<host>.txt` holding the captured
//! error text, and the run's failures are listed in `<dir>/failed_hosts.txt`
//! as `host<TAB>kind<TAB>artifact`.

use std::fmt::Write as _;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::fleet::HostFailure;
use crate::target::TargetHost;

/// File name of the failure index inside the artifact directory.
pub const FAILURE_INDEX_FILE: &str = "failed_hosts.txt";

/// Map a host identifier to a safe file stem. Anything outside
/// `[A-Za-z0-9._-]` becomes `_` (IPv6 colons, path separators). When a
/// character had to be replaced, a short digest of the original host is
/// appended so `sw:1` and `sw_1` never share a file.
pub fn sanitize_host(host: &str) -> String {
    let stem: String = host
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.is_empty() || stem.chars().all(|c| c == '.') {
        format!("_{}", stem)
    } else {
        stem
    };
    if stem == host {
        return stem;
    }
    let digest = format!("{:x}", Sha256::digest(host.as_bytes()));
    format!("{}-{}", stem, &digest[..8])
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, host: &TargetHost) -> PathBuf {
        self.dir.join(format!("{}.txt", sanitize_host(host.as_str())))
    }

    /// Write the error text for `host`, replacing any earlier artifact.
    pub async fn write_host_error(&self, host: &TargetHost, text: &str) -> crate::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(host);
        tokio::fs::write(&path, text).await?;
        Ok(path)
    }

    /// Replace the failure index with this run's failures. A clean run
    /// removes any index left by an earlier run and returns `None`.
    pub async fn write_failure_index(
        &self,
        failures: &[HostFailure],
    ) -> crate::Result<Option<PathBuf>> {
        let path = self.dir.join(FAILURE_INDEX_FILE);
        if failures.is_empty() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "stale failed host list removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(None);
        }
        let mut body = String::new();
        for failure in failures {
            let artifact = failure
                .artifact
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(body, "{}\t{}\t{}", failure.host, failure.kind, artifact);
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, body).await?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_sanitize_host() {
        assert_eq!(sanitize_host("sw-core-1.lab"), "sw-core-1.lab");
        assert_eq!(sanitize_host("sw_1"), "sw_1");
        assert!(sanitize_host("fe80::1").starts_with("fe80__1-"));
        assert!(sanitize_host("../etc/passwd").starts_with(".._etc_passwd-"));
        assert!(sanitize_host("..").starts_with("_..-"));
        assert!(!sanitize_host("a/b").contains('/'));
    }

    #[test]
    fn test_lossy_names_do_not_collide() {
        assert_ne!(sanitize_host("sw:1"), sanitize_host("sw_1"));
        assert_ne!(sanitize_host("sw:1"), sanitize_host("sw/1"));
        assert_eq!(sanitize_host("sw:1"), sanitize_host("sw:1"));

        let writer = ArtifactWriter::new("/tmp/errors");
        assert_ne!(
            writer.path_for(&TargetHost::from("sw:1")),
            writer.path_for(&TargetHost::from("sw_1"))
        );
    }

    #[tokio::test]
    async fn test_write_host_error_creates_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(tmp.path().join("errors"));
        let host = TargetHost::from("sw1");
        let path = writer
            .write_host_error(&host, "FATAL ERROR: Network error: Connection refused")
            .await
            .unwrap();
        assert_eq!(path, tmp.path().join("errors").join("sw1.txt"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Connection refused"));
    }

    #[tokio::test]
    async fn test_failure_index_lists_hosts() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(tmp.path());
        let failures = vec![
            HostFailure {
                host: TargetHost::from("sw1"),
                kind: FailureKind::CommandFailure,
                message: "boom".into(),
                artifact: Some(tmp.path().join("sw1.txt")),
            },
            HostFailure {
                host: TargetHost::from("sw2"),
                kind: FailureKind::Unreachable,
                message: "down".into(),
                artifact: None,
            },
        ];
        let path = writer.write_failure_index(&failures).await.unwrap().unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("sw1\tcommand-failure\t"));
        assert!(lines[0].ends_with("sw1.txt"));
        assert_eq!(lines[1], "sw2\tunreachable\t-");
    }

    #[tokio::test]
    async fn test_failure_index_skipped_when_clean() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(tmp.path());
        assert!(writer.write_failure_index(&[]).await.unwrap().is_none());
        assert!(!tmp.path().join(FAILURE_INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn test_clean_run_clears_previous_index() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(tmp.path());
        let failures = vec![HostFailure {
            host: TargetHost::from("sw1"),
            kind: FailureKind::CommandFailure,
            message: "boom".into(),
            artifact: None,
        }];
        writer.write_failure_index(&failures).await.unwrap();
        assert!(tmp.path().join(FAILURE_INDEX_FILE).exists());

        assert!(writer.write_failure_index(&[]).await.unwrap().is_none());
        assert!(!tmp.path().join(FAILURE_INDEX_FILE).exists());
    }
}
