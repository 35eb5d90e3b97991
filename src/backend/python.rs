//! Python agent backend.
//!
//! Starts one Python process per session running a small bootstrap agent.
//! The agent executes each request in a namespace that persists across
//! runs, with `sys.stdout` swapped for a `StringIO` for the duration of the
//! run. Exceptions raised by user code are written into that buffer; any
//! other failure is answered with an error frame and the agent keeps serving.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument};

use super::InterpretedEngine;
use crate::config::PythonConfig;
use crate::transport::{AgentRequest, AgentResponse, StdioPipeTransport, Transport};

/// Bootstrap run with `python -c`.
///
/// Frames travel over duplicates of the original stdin and stdout. fd 1 is
/// then pointed at stderr so stray writes to `sys.__stdout__` cannot corrupt
/// the protocol, and fd 0 at the null device so `input()` hits EOF instead
/// of eating frames.
const AGENT_SOURCE: &str = r#"
import io, json, os, struct, sys

_proto_in = os.fdopen(os.dup(0), "rb")
_proto_out = os.fdopen(os.dup(1), "wb")
os.dup2(2, 1)
_null = os.open(os.devnull, os.O_RDONLY)
os.dup2(_null, 0)
os.close(_null)


def _recv():
    header = _proto_in.read(4)
    if len(header) < 4:
        return None
    (size,) = struct.unpack(">I", header)
    return json.loads(_proto_in.read(size).decode("utf-8"))


def _send(message):
    # Lone surrogates become "?" so every frame is valid UTF-8 JSON.
    payload = json.dumps(message, ensure_ascii=False).encode("utf-8", "replace")
    _proto_out.write(struct.pack(">I", len(payload)) + payload)
    _proto_out.flush()


def _describe(e):
    try:
        return str(e)
    except BaseException:
        return type(e).__name__


_namespace = {"__name__": "__main__"}


def _execute(request):
    capture = io.StringIO()
    saved = sys.stdout
    sys.stdout = capture
    try:
        exec(request["code"], _namespace)
    except Exception as e:
        capture.write(_describe(e))
    finally:
        sys.stdout = saved
    return {"type": "result", "id": request["id"], "output": capture.getvalue()}


_send({"type": "ready"})

while True:
    request = _recv()
    if request is None or request.get("type") == "shutdown":
        break
    if request.get("type") == "ping":
        _send({"type": "pong"})
        continue
    if request.get("type") != "execute":
        _send({"type": "error", "message": "unknown request: %r" % request.get("type")})
        continue

    try:
        reply = _execute(request)
    except BaseException as e:
        reply = {"type": "error", "message": "%s: %s" % (type(e).__name__, _describe(e))}
    _send(reply)
"#;

/// Interpreted engine backed by a persistent Python agent process.
pub struct PythonAgent {
    transport: Box<dyn Transport>,
    next_id: AtomicU64,
}

impl PythonAgent {
    /// Start the agent and wait for its Ready handshake.
    #[instrument(skip(config), fields(executable = %config.executable))]
    pub async fn load(config: &PythonConfig) -> Result<Self> {
        let mut args = config.args.clone();
        args.extend(["-u".to_string(), "-c".to_string(), AGENT_SOURCE.to_string()]);

        let transport = StdioPipeTransport::spawn(
            &config.executable,
            &args,
            Duration::from_secs(config.ready_timeout_seconds),
        )
        .await
        .context("Failed to start Python agent")?;

        Ok(Self::with_transport(Box::new(transport)))
    }

    /// Wrap an already connected transport.
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// Round-trip a ping to the agent.
    pub async fn ping(&self) -> Result<()> {
        match self.transport.request(&AgentRequest::Ping).await? {
            AgentResponse::Pong => Ok(()),
            other => anyhow::bail!("Unexpected agent response: {other:?}"),
        }
    }
}

#[async_trait]
impl InterpretedEngine for PythonAgent {
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    async fn run_captured(&self, code: &str) -> Result<String> {
        if !self.transport.is_alive() {
            anyhow::bail!("Python agent has exited");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let req = AgentRequest::Execute {
            id: id.clone(),
            code: code.to_string(),
        };

        match self.transport.request(&req).await? {
            AgentResponse::Result {
                id: resp_id,
                output,
            } => {
                anyhow::ensure!(
                    resp_id == id,
                    "Agent answered request {resp_id}, expected {id}"
                );
                debug!(output_len = output.len(), "Python run completed");
                Ok(output)
            }
            AgentResponse::Error { message } => anyhow::bail!("{message}"),
            other => anyhow::bail!("Unexpected agent response: {other:?}"),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.transport.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Replays canned responses in order.
    struct ScriptedTransport {
        responses: Mutex<Vec<AgentResponse>>,
    }

    impl ScriptedTransport {
        fn new(mut responses: Vec<AgentResponse>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn request(&self, _req: &AgentRequest) -> Result<AgentResponse> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .context("no scripted response left")
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success())
    }

    async fn real_agent() -> Option<PythonAgent> {
        if !python_available() {
            return None;
        }
        Some(PythonAgent::load(&PythonConfig::default()).await.unwrap())
    }

    #[tokio::test]
    async fn result_output_is_returned() {
        let agent = PythonAgent::with_transport(Box::new(ScriptedTransport::new(vec![
            AgentResponse::Result {
                id: "1".to_string(),
                output: "hi\n".to_string(),
            },
        ])));

        assert_eq!(agent.run_captured("print('hi')").await.unwrap(), "hi\n");
    }

    #[tokio::test]
    async fn agent_error_becomes_engine_failure() {
        let agent = PythonAgent::with_transport(Box::new(ScriptedTransport::new(vec![
            AgentResponse::Error {
                message: "SystemExit: 3".to_string(),
            },
        ])));

        let err = agent.run_captured("raise SystemExit(3)").await.unwrap_err();
        assert_eq!(err.to_string(), "SystemExit: 3");
    }

    #[tokio::test]
    async fn mismatched_id_is_rejected() {
        let agent = PythonAgent::with_transport(Box::new(ScriptedTransport::new(vec![
            AgentResponse::Result {
                id: "42".to_string(),
                output: String::new(),
            },
        ])));

        let err = agent.run_captured("pass").await.unwrap_err();
        assert!(err.to_string().contains("expected 1"));
    }

    #[tokio::test]
    async fn print_is_captured() {
        let Some(agent) = real_agent().await else {
            return;
        };

        let output = agent.run_captured("print(\"hi\")").await.unwrap();
        assert_eq!(output, "hi\n");
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn exception_text_replaces_traceback() {
        let Some(agent) = real_agent().await else {
            return;
        };

        let output = agent
            .run_captured("print('before')\nraise ValueError(\"bad\")")
            .await
            .unwrap();
        assert_eq!(output, "before\nbad");
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn namespace_persists_between_runs() {
        let Some(agent) = real_agent().await else {
            return;
        };

        agent.run_captured("counter = 41").await.unwrap();
        let output = agent.run_captured("counter += 1\nprint(counter)").await.unwrap();
        assert_eq!(output, "42\n");
        agent.ping().await.unwrap();
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn system_exit_is_an_engine_failure() {
        let Some(agent) = real_agent().await else {
            return;
        };

        let err = agent.run_captured("import sys\nsys.exit(3)").await.unwrap_err();
        assert!(err.to_string().starts_with("SystemExit"));

        // The agent keeps serving after reporting the failure.
        let output = agent.run_captured("print('still here')").await.unwrap();
        assert_eq!(output, "still here\n");
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn exception_with_failing_str_keeps_agent_serving() {
        let Some(agent) = real_agent().await else {
            return;
        };

        let output = agent
            .run_captured(
                "class Opaque(Exception):\n    def __str__(self):\n        raise RuntimeError('no str')\nraise Opaque()",
            )
            .await
            .unwrap();
        assert_eq!(output, "Opaque");

        let output = agent.run_captured("print('ok')").await.unwrap();
        assert_eq!(output, "ok\n");
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unpaired_surrogate_output_keeps_agent_serving() {
        let Some(agent) = real_agent().await else {
            return;
        };

        let output = agent.run_captured("print('a\\ud800')").await.unwrap();
        assert_eq!(output, "a?\n");

        let output = agent.run_captured("print('ok')").await.unwrap();
        assert_eq!(output, "ok\n");
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stray_stdout_writes_do_not_break_framing() {
        let Some(agent) = real_agent().await else {
            return;
        };

        let output = agent
            .run_captured("import sys\nsys.__stdout__.write('noise\\n')\nprint('clean')")
            .await
            .unwrap();
        assert_eq!(output, "clean\n");
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn input_is_not_supported() {
        let Some(agent) = real_agent().await else {
            return;
        };

        let output = agent.run_captured("name = input()").await.unwrap();
        assert!(output.contains("EOF"));
        agent.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn missing_executable_fails_to_load() {
        let config = PythonConfig {
            executable: "/nonexistent/python".to_string(),
            ..PythonConfig::default()
        };

        let err = PythonAgent::load(&config).await.err().unwrap();
        assert!(format!("{err:#}").contains("Failed to start Python agent"));
    }
}
