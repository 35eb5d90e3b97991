//! Execution bridge.
//!
//! Routes a run request to exactly one isolation strategy by language and
//! folds its result into the session's output buffer. Nothing escapes this
//! boundary: every failure ends up as display text.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{InterpreterSlot, SandboxError, SandboxMessage, ScriptSandbox};
use crate::config::Labels;

/// Languages offered by the selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Runs on the interpreted engine.
    #[default]
    Python,
    /// Runs in the script sandbox.
    Javascript,
}

impl Language {
    pub const ALL: [Self; 2] = [Self::Python, Self::Javascript];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector value that names no supported language.
#[derive(Debug, Error)]
#[error("unknown language '{0}', expected one of: python, javascript")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|lang| lang.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

/// One press of Run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub language: Language,
    pub source: String,
}

/// The session's output text. Clones share the same buffer.
///
/// Backed by a watch channel so front-ends can follow changes.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    text: Arc<watch::Sender<String>>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuffer {
    pub fn new() -> Self {
        let (text, _) = watch::channel(String::new());
        Self {
            text: Arc::new(text),
        }
    }

    /// Current contents.
    pub fn snapshot(&self) -> String {
        self.text.borrow().clone()
    }

    pub fn replace(&self, text: String) {
        self.text.send_replace(text);
    }

    pub fn append(&self, text: &str) {
        self.text.send_modify(|current| current.push_str(text));
    }

    pub fn clear(&self) {
        self.text.send_modify(String::clear);
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.text.subscribe()
    }
}

/// Completion of a dispatched run.
///
/// Dropping the handle does not cancel the run.
#[derive(Debug)]
pub struct RunHandle {
    task: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// A run that finished (or was dropped) during dispatch.
    const fn settled() -> Self {
        Self { task: None }
    }

    const fn pending(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Whether work is still outstanding at dispatch time.
    pub const fn is_pending(&self) -> bool {
        self.task.is_some()
    }

    /// Wait until the run's result has been written to the output buffer.
    pub async fn finished(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                warn!(error = %e, "Run task did not complete");
            }
        }
    }
}

/// Dispatches runs to the interpreted engine or the script sandbox.
pub struct ExecutionBridge {
    interpreter: InterpreterSlot,
    sandbox: Arc<ScriptSandbox>,
    output: OutputBuffer,
    labels: Labels,
}

impl ExecutionBridge {
    pub fn new(
        interpreter: InterpreterSlot,
        sandbox: Arc<ScriptSandbox>,
        output: OutputBuffer,
        labels: Labels,
    ) -> Self {
        Self {
            interpreter,
            sandbox,
            output,
            labels,
        }
    }

    /// Start a run. Must be called from within a tokio runtime.
    pub fn dispatch(&self, request: ExecutionRequest) -> RunHandle {
        info!(
            language = %request.language,
            code_len = request.source.len(),
            "Dispatching run"
        );

        match request.language {
            Language::Python => self.run_interpreted(request.source),
            Language::Javascript => {
                self.output.clear();
                self.run_sandboxed(request.source)
            }
        }
    }

    /// The output of an interpreted run replaces the buffer when it completes.
    fn run_interpreted(&self, source: String) -> RunHandle {
        let Some(engine) = self.interpreter.get() else {
            debug!("Interpreter not ready, dropping run");
            return RunHandle::settled();
        };

        let output = self.output.clone();
        let label = self.labels.python_error;
        RunHandle::pending(tokio::spawn(async move {
            let text = match engine.run_captured(&source).await {
                Ok(captured) => captured,
                Err(e) => {
                    warn!(error = %e, "Interpreter failed");
                    format!("{label}{e}")
                }
            };
            output.replace(text);
        }))
    }

    /// Script runs are checked up front, then executed on a blocking worker
    /// while a listener folds the posted messages into the buffer.
    fn run_sandboxed(&self, source: String) -> RunHandle {
        if let Err(e) = self.sandbox.check_syntax(&source) {
            let label = match e {
                SandboxError::Syntax(_) => self.labels.script_syntax_error,
                SandboxError::Engine(_) => self.labels.script_error,
            };
            self.output.replace(format!("{label}{e}"));
            return RunHandle::settled();
        }

        let (events, messages) = mpsc::unbounded_channel();
        let listener = tokio::spawn(forward_messages(
            messages,
            self.output.clone(),
            self.labels.script_error,
        ));

        let sandbox = Arc::clone(&self.sandbox);
        tokio::task::spawn_blocking(move || sandbox.execute(&source, events));

        RunHandle::pending(listener)
    }
}

/// Apply sandbox messages to the output until the sandbox hangs up.
async fn forward_messages(
    mut messages: mpsc::UnboundedReceiver<SandboxMessage>,
    output: OutputBuffer,
    error_label: &'static str,
) {
    while let Some(message) = messages.recv().await {
        match message {
            SandboxMessage::Log { message } => output.append(&format!("{message}\n")),
            SandboxMessage::Error { message } => {
                debug!(message = %message, "Script reported an error");
                output.replace(format!("{error_label}{message}"));
            }
        }
    }
}
