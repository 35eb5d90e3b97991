//! Playground session state and controls.
//!
//! A `Playground` owns the selected language, the source text, the output
//! buffer and the interpreter handle for one user session. Its methods are
//! the controls of the editor page: select a language, edit the
//! source, Run, Clear.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{InterpretedEngine, InterpreterSlot, PythonAgent, ScriptSandbox};
use crate::bridge::{ExecutionBridge, ExecutionRequest, Language, OutputBuffer, RunHandle};
use crate::config::{Config, Labels};

/// One playground session.
pub struct Playground {
    language: RwLock<Language>,
    source: RwLock<String>,
    output: OutputBuffer,
    interpreter: InterpreterSlot,
    loader: Mutex<Option<JoinHandle<()>>>,
    bridge: ExecutionBridge,
}

impl Playground {
    /// Create a session whose interpreter is provided by `interpreter`.
    ///
    /// Nothing is loaded; install an engine into the slot (or use
    /// [`Playground::start`]) to enable the interpreted path.
    pub fn new(default_language: Language, labels: Labels, interpreter: InterpreterSlot) -> Self {
        let output = OutputBuffer::new();
        let bridge = ExecutionBridge::new(
            interpreter.clone(),
            Arc::new(ScriptSandbox::new()),
            output.clone(),
            labels,
        );

        Self {
            language: RwLock::new(default_language),
            source: RwLock::new(String::new()),
            output,
            interpreter,
            loader: Mutex::new(None),
            bridge,
        }
    }

    /// Create a session and start loading the Python agent in the background.
    ///
    /// Runs on the interpreted path are dropped until loading completes. A
    /// failed load is only logged. Must be called from within a tokio runtime.
    pub fn start(config: &Config) -> Self {
        let mut playground = Self::new(
            config.default_language,
            config.labels(),
            InterpreterSlot::new(),
        );

        let python = config.python.clone();
        let loader = playground.interpreter.load_in_background(async move {
            let agent = PythonAgent::load(&python).await?;
            Ok::<_, anyhow::Error>(Arc::new(agent) as Arc<dyn InterpretedEngine>)
        });
        *playground.loader.get_mut() = Some(loader);

        info!(language = %config.default_language, "Playground session started");
        playground
    }

    pub async fn language(&self) -> Language {
        *self.language.read().await
    }

    /// Change the selected language. Output is left untouched.
    pub async fn select_language(&self, language: Language) {
        debug!(language = %language, "Language selected");
        *self.language.write().await = language;
    }

    pub async fn source(&self) -> String {
        self.source.read().await.clone()
    }

    /// Replace the source text, as the editor does on every edit.
    pub async fn set_source(&self, source: impl Into<String>) {
        *self.source.write().await = source.into();
    }

    /// Current output text.
    pub fn output(&self) -> String {
        self.output.snapshot()
    }

    /// Follow output changes.
    pub fn subscribe_output(&self) -> tokio::sync::watch::Receiver<String> {
        self.output.subscribe()
    }

    /// Run the current source in the selected language.
    ///
    /// Returns immediately; await the handle to observe completion. Runs are
    /// neither serialized nor cancelled, so overlapping runs race for the
    /// output buffer.
    pub async fn run(&self) -> RunHandle {
        let request = ExecutionRequest {
            language: self.language().await,
            source: self.source().await,
        };
        self.bridge.dispatch(request)
    }

    /// Select `language`, replace the source and run exactly that source.
    ///
    /// The request is built from the arguments, so control calls made while
    /// this is in progress cannot change what runs.
    pub async fn submit(&self, language: Language, source: String) -> RunHandle {
        self.select_language(language).await;
        self.set_source(source.clone()).await;
        self.bridge.dispatch(ExecutionRequest { language, source })
    }

    /// Reset source and output. In-flight runs are not cancelled and may
    /// still write their result afterwards.
    pub async fn clear(&self) {
        self.source.write().await.clear();
        self.output.clear();
        debug!("Playground cleared");
    }

    pub fn interpreter_ready(&self) -> bool {
        self.interpreter.is_ready()
    }

    /// Wait for the background interpreter load, if one was started.
    ///
    /// Returns whether the interpreter is ready afterwards.
    pub async fn wait_for_interpreter(&self) -> bool {
        let loader = self.loader.lock().await.take();
        if let Some(loader) = loader {
            if let Err(e) = loader.await {
                warn!(error = %e, "Interpreter loader task failed");
            }
        }
        self.interpreter.is_ready()
    }

    /// Stop the interpreter, if one is running.
    pub async fn shutdown(&self) {
        if let Some(engine) = self.interpreter.get() {
            if let Err(e) = engine.shutdown().await {
                warn!(error = %e, "Error shutting down interpreter");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::config::{Locale, PythonConfig};

    /// Echoes the code once a permit is released.
    struct Gated {
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl InterpretedEngine for Gated {
        async fn run_captured(&self, code: &str) -> Result<String> {
            self.release.acquire().await?.forget();
            Ok(format!("{code}\n"))
        }
    }

    struct Upper;

    #[async_trait]
    impl InterpretedEngine for Upper {
        async fn run_captured(&self, code: &str) -> Result<String> {
            Ok(code.to_uppercase())
        }
    }

    fn playground_with(engine: Arc<dyn InterpretedEngine>) -> Playground {
        Playground::new(
            Language::Python,
            Locale::En.labels(),
            InterpreterSlot::ready(engine),
        )
    }

    #[tokio::test]
    async fn defaults_to_configured_language() {
        let playground = Playground::new(
            Language::Javascript,
            Locale::Ru.labels(),
            InterpreterSlot::new(),
        );
        assert_eq!(playground.language().await, Language::Javascript);
        assert_eq!(playground.source().await, "");
        assert_eq!(playground.output(), "");
        assert!(!playground.interpreter_ready());
    }

    #[tokio::test]
    async fn run_uses_current_language_and_source() {
        let playground = playground_with(Arc::new(Upper));
        playground.set_source("abc").await;

        playground.run().await.finished().await;
        assert_eq!(playground.output(), "ABC");

        playground.select_language(Language::Javascript).await;
        playground.set_source("console.log('js')").await;
        playground.run().await.finished().await;
        assert_eq!(playground.output(), "js\n");
    }

    #[tokio::test]
    async fn switching_language_keeps_output() {
        let playground = playground_with(Arc::new(Upper));
        playground.set_source("keep").await;
        playground.run().await.finished().await;

        playground.select_language(Language::Javascript).await;
        playground.select_language(Language::Python).await;
        assert_eq!(playground.output(), "KEEP");
    }

    #[tokio::test]
    async fn clear_resets_source_and_output() {
        let playground = playground_with(Arc::new(Upper));
        playground.set_source("text").await;
        playground.run().await.finished().await;

        playground.clear().await;
        assert_eq!(playground.source().await, "");
        assert_eq!(playground.output(), "");
    }

    #[tokio::test]
    async fn result_landing_after_clear_overwrites_it() {
        let release = Arc::new(Semaphore::new(0));
        let playground = playground_with(Arc::new(Gated {
            release: Arc::clone(&release),
        }));
        playground.set_source("late").await;

        let handle = playground.run().await;
        playground.clear().await;
        assert_eq!(playground.output(), "");

        release.add_permits(1);
        handle.finished().await;
        assert_eq!(playground.output(), "late\n");
    }

    #[tokio::test]
    async fn submitted_source_is_unaffected_by_later_edits() {
        let release = Arc::new(Semaphore::new(0));
        let playground = playground_with(Arc::new(Gated {
            release: Arc::clone(&release),
        }));

        let handle = playground
            .submit(Language::Python, "submitted".to_string())
            .await;
        assert_eq!(playground.source().await, "submitted");

        playground.set_source("edited").await;
        playground.select_language(Language::Javascript).await;
        release.add_permits(1);
        handle.finished().await;

        assert_eq!(playground.output(), "submitted\n");
    }

    #[tokio::test]
    async fn overlapping_runs_last_completion_wins() {
        let gate = Arc::new(Semaphore::new(0));
        let playground = playground_with(Arc::new(Gated {
            release: Arc::clone(&gate),
        }));

        playground.set_source("first").await;
        let first = playground.run().await;
        playground.set_source("second").await;
        let second = playground.run().await;

        gate.add_permits(2);
        first.finished().await;
        second.finished().await;

        let output = playground.output();
        assert!(output == "first\n" || output == "second\n");
    }

    #[tokio::test]
    async fn failed_interpreter_load_is_not_surfaced() {
        let config = Config {
            python: PythonConfig {
                executable: "/nonexistent/python".to_string(),
                ..PythonConfig::default()
            },
            ..Config::default()
        };
        let playground = Playground::start(&config);

        assert!(!playground.wait_for_interpreter().await);
        playground.set_source("print('hi')").await;
        playground.run().await.finished().await;
        assert_eq!(playground.output(), "");
    }

    #[tokio::test]
    async fn wait_without_loader_reports_slot_state() {
        let playground = playground_with(Arc::new(Upper));
        assert!(playground.wait_for_interpreter().await);
        playground.shutdown().await;
    }
}
