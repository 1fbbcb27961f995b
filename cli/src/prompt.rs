//! Terminal host-key prompt.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use mactable::{TargetHost, TrustDecision, TrustPrompter};
use tokio::sync::Mutex;

/// Asks on stderr/stdin whether to trust an unknown host key. Prompts are
/// serialized so parallel hosts never interleave questions.
#[derive(Default)]
pub struct TerminalPrompter {
    lock: Mutex<()>,
}

#[async_trait]
impl TrustPrompter for TerminalPrompter {
    async fn decide(&self, host: &TargetHost, notice: &str) -> TrustDecision {
        let _guard = self.lock.lock().await;
        let host = host.to_string();
        let notice = notice.to_string();
        match tokio::task::spawn_blocking(move || ask(&host, &notice)).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "host key prompt failed, rejecting");
                TrustDecision::Reject
            }
        }
    }
}

fn ask(host: &str, notice: &str) -> TrustDecision {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr);
    for line in notice.lines().filter(|l| !l.to_lowercase().contains("abandoned")) {
        let _ = writeln!(stderr, "  {}", line);
    }
    let _ = write!(
        stderr,
        "Trust host key for {}? [c]ache and connect / connect [o]nce / [r]eject: ",
        host
    );
    let _ = stderr.flush();
    drop(stderr);

    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => parse_answer(&answer),
        Err(_) => TrustDecision::Reject,
    }
}

/// Map a typed answer to a decision. Anything unrecognized rejects.
pub fn parse_answer(answer: &str) -> TrustDecision {
    match answer.trim().to_lowercase().as_str() {
        "c" | "cache" | "y" | "yes" => TrustDecision::AcceptAndCache,
        "o" | "once" => TrustDecision::AcceptOnce,
        _ => TrustDecision::Reject,
    }
}
