//! Execution engines behind the playground's two isolation strategies.
//!
//! The interpreted strategy talks to a long-lived Python agent; the script
//! strategy runs JavaScript in a throwaway Boa realm. The bridge only sees
//! the `InterpretedEngine` trait and the `ScriptSandbox` type.

mod python;
mod script;

pub use python::PythonAgent;
pub use script::{SandboxError, SandboxMessage, ScriptSandbox};

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// An initialized, stateful interpreter that runs source with stdout captured.
///
/// Program-level exceptions are part of the captured text. An `Err` means the
/// engine itself failed (dead process, broken protocol, interpreter exit).
#[async_trait]
pub trait InterpretedEngine: Send + Sync {
    /// Run `code` and return everything it printed, or the text of the
    /// exception that stopped it.
    async fn run_captured(&self, code: &str) -> Result<String>;

    /// Release the engine's resources.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Lazily initialized, shared interpreter handle with an explicit ready state.
///
/// At most one engine is ever installed. Clones share the same slot.
#[derive(Clone, Default)]
pub struct InterpreterSlot {
    cell: Arc<OnceCell<Arc<dyn InterpretedEngine>>>,
}

impl InterpreterSlot {
    /// An empty slot; runs against it are dropped until an engine is installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot that is ready from the start.
    pub fn ready(engine: Arc<dyn InterpretedEngine>) -> Self {
        let slot = Self::new();
        slot.install(engine);
        slot
    }

    /// The engine, if loading has completed.
    pub fn get(&self) -> Option<Arc<dyn InterpretedEngine>> {
        self.cell.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }

    /// Install the engine. Returns `false` if one was already installed.
    pub fn install(&self, engine: Arc<dyn InterpretedEngine>) -> bool {
        self.cell.set(engine).is_ok()
    }

    /// Run `loader` in the background and install its engine on success.
    ///
    /// A failed load is logged and leaves the slot empty.
    pub fn load_in_background<F>(&self, loader: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<Arc<dyn InterpretedEngine>>> + Send + 'static,
    {
        let slot = self.clone();
        tokio::spawn(async move {
            match loader.await {
                Ok(engine) => {
                    if slot.install(engine) {
                        info!("Interpreter ready");
                    }
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    error!(error = %message, "Failed to load interpreter");
                }
            }
        })
    }
}
