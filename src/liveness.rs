//! Fast host-liveness check: a bounded TCP connect to the SSH port before
//! any remote-shell client is spawned.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::CollectError;
use crate::target::TargetHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessCheck {
    pub port: u16,
    pub timeout: Duration,
}

impl Default for LivenessCheck {
    fn default() -> Self {
        Self {
            port: 22,
            timeout: Duration::from_millis(1500),
        }
    }
}

impl LivenessCheck {
    /// Succeeds when a TCP connection to `host:port` opens within the timeout.
    pub async fn probe(&self, host: &TargetHost) -> crate::Result<()> {
        let connect = TcpStream::connect((host.as_str(), self.port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(CollectError::Unreachable(
                host.to_string(),
                format!("port {}: {}", self.port, e),
            )),
            Err(_elapsed) => Err(CollectError::Unreachable(
                host.to_string(),
                format!(
                    "port {}: no answer within {}ms",
                    self.port,
                    self.timeout.as_millis()
                ),
            )),
        }
    }
}
