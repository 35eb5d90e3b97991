//! Stdin/stdout pipe transport for agent processes.
//!
//! Owns a child process, communicates via length-prefixed JSON on
//! the child's stdin (requests) and stdout (responses).
//! Mutex-guarded for safe concurrent access from overlapping runs.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::protocol::{AgentRequest, AgentResponse};
use super::{recv_message, send_message, FrameError, Transport};

/// Transport that communicates with an agent via stdin/stdout pipes.
///
/// The agent process is spawned once and kept alive for the session lifetime.
/// Each `request()` call acquires both stdin and stdout mutexes to ensure
/// atomic send/receive (no interleaving from concurrent callers).
pub struct StdioPipeTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<ChildStdout>,
    alive: AtomicBool,
}

impl StdioPipeTransport {
    /// Spawn an agent process and wait for its `Ready` message.
    ///
    /// `program` and `args` form the agent command line.
    /// `ready_timeout` is how long to wait for the agent's Ready message.
    pub async fn spawn(program: &str, args: &[String], ready_timeout: Duration) -> Result<Self> {
        debug!(program = %program, "Spawning agent process");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn agent: {program}"))?;

        let stdin = child.stdin.take().context("Failed to take agent stdin")?;
        let mut stdout = child.stdout.take().context("Failed to take agent stdout")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        // Wait for the agent's Ready message
        let ready_result = tokio::time::timeout(ready_timeout, recv_message(&mut stdout)).await;

        let ready_bytes = ready_result
            .map_err(|_| anyhow::anyhow!("Agent did not send Ready within {ready_timeout:?}"))?
            .context("Failed to read agent Ready message")?;

        let ready_msg: AgentResponse =
            serde_json::from_slice(&ready_bytes).context("Failed to parse agent Ready message")?;

        match ready_msg {
            AgentResponse::Ready => {
                debug!("Agent is ready");
            }
            other => {
                anyhow::bail!("Expected Ready message, got: {other:?}");
            }
        }

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(stdout),
            alive: AtomicBool::new(true),
        })
    }

    /// Send one frame and read one frame back.
    async fn exchange(&self, req_bytes: &[u8]) -> Result<Vec<u8>, FrameError> {
        // Acquire both locks for atomic send/receive
        let mut stdin = self.stdin.lock().await;
        let mut stdout = self.stdout.lock().await;

        send_message(&mut *stdin, req_bytes).await?;
        recv_message(&mut *stdout).await
    }
}

/// Relay whatever the agent writes to stderr into the log.
async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "code_playground::agent", "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Agent stderr closed");
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for StdioPipeTransport {
    async fn request(&self, req: &AgentRequest) -> Result<AgentResponse> {
        if !self.alive.load(Ordering::Relaxed) {
            anyhow::bail!("Agent process is not alive");
        }

        let req_bytes = serde_json::to_vec(req).context("Failed to serialize request")?;
        let resp_bytes = match self.exchange(&req_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Agent connection lost");
                self.alive.store(false, Ordering::Relaxed);
                return Err(anyhow::Error::new(e).context("Agent exchange failed"));
            }
        };

        // A complete frame keeps the stream in sync even if it does not decode.
        serde_json::from_slice(&resp_bytes).context("Failed to parse agent response")
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.alive.load(Ordering::Relaxed) {
            return Ok(());
        }

        // The agent exits on Shutdown without replying, so only send it.
        let shutdown_result: Result<()> = async {
            let bytes = serde_json::to_vec(&AgentRequest::Shutdown)?;
            let mut stdin = self.stdin.lock().await;
            send_message(&mut *stdin, &bytes).await?;
            Ok(())
        }
        .await;

        if let Err(e) = shutdown_result {
            warn!(error = %e, "Graceful shutdown failed, killing agent");
        }

        self.alive.store(false, Ordering::Relaxed);

        // Kill the process to ensure cleanup
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        let _ = child.wait().await;

        debug!("Agent process shut down");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A shell agent that replays `frames` on stdout, then idles on stdin.
    async fn replaying_agent(frames: &str) -> StdioPipeTransport {
        let script = format!("printf '{frames}'; cat > /dev/null");
        StdioPipeTransport::spawn("sh", &["-c".to_string(), script], Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn undecodable_reply_keeps_transport_usable() {
        let transport = replaying_agent(
            r#"\000\000\000\020{"type":"ready"}\000\000\000\003abc\000\000\000\017{"type":"pong"}"#,
        )
        .await;

        let err = transport.request(&AgentRequest::Ping).await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse agent response"));
        assert!(transport.is_alive());

        let pong = transport.request(&AgentRequest::Ping).await.unwrap();
        assert!(matches!(pong, AgentResponse::Pong));
        transport.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn agent_exit_marks_transport_dead() {
        let transport = StdioPipeTransport::spawn(
            "sh",
            &[
                "-c".to_string(),
                r#"printf '\000\000\000\020{"type":"ready"}'"#.to_string(),
            ],
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        tokio_test::assert_err!(transport.request(&AgentRequest::Ping).await);
        assert!(!transport.is_alive());

        let err = transport.request(&AgentRequest::Ping).await.unwrap_err();
        assert!(err.to_string().contains("not alive"));
    }

    #[tokio::test]
    async fn missing_ready_message_fails_spawn() {
        let result = StdioPipeTransport::spawn(
            "sh",
            &["-c".to_string(), "exit 0".to_string()],
            Duration::from_secs(5),
        )
        .await;

        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("Agent closed the connection"));
    }
}
