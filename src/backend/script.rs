//! Sandboxed JavaScript backend using the Boa engine.
//!
//! Every run gets a brand-new realm whose only host binding is
//! `console.log`. Logged lines are recorded in an array that user code
//! cannot reach, and a thrown value is caught at the evaluation boundary.
//! Both are forwarded over a channel once the script returns; the realm is
//! dropped immediately afterwards, so promise jobs and other deferred work
//! never run.

use std::sync::atomic::{AtomicU64, Ordering};

use boa_engine::object::builtins::JsArray;
use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsError, JsResult, JsString, JsValue, NativeFunction, Source};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Message posted from inside the sandbox to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxMessage {
    /// One `console.log` call.
    Log { message: String },
    /// An error thrown by the script.
    Error { message: String },
}

/// Failures detected before a script is handed to a realm.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The source does not parse as a function body.
    #[error("{0}")]
    Syntax(String),

    /// The checking realm itself failed.
    #[error("{0}")]
    Engine(String),
}

/// Runs JavaScript in throwaway realms.
#[derive(Debug, Default)]
pub struct ScriptSandbox {
    contexts_created: AtomicU64,
}

impl ScriptSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of execution realms created so far.
    ///
    /// The syntax checker's parse-only realm is not counted.
    pub fn contexts_created(&self) -> u64 {
        self.contexts_created.load(Ordering::Relaxed)
    }

    /// Check that `code` parses as a function body, without running it.
    pub fn check_syntax(&self, code: &str) -> Result<(), SandboxError> {
        let literal =
            serde_json::to_string(code).map_err(|e| SandboxError::Engine(e.to_string()))?;
        let checker_source = format!(
            "(function (src) {{ try {{ new Function(src); return null; }} \
             catch (e) {{ return String(e && e.message !== undefined ? e.message : e); }} }})({literal})"
        );

        let mut checker = Context::default();
        let verdict = checker
            .eval(Source::from_bytes(&checker_source))
            .map_err(|e| SandboxError::Engine(e.to_string()))?;

        if verdict.is_null() {
            return Ok(());
        }

        let message = verdict
            .to_string(&mut checker)
            .map_err(|e| SandboxError::Engine(e.to_string()))?
            .to_std_string_escaped();
        debug!(message = %message, "Script rejected by syntax check");
        Err(SandboxError::Syntax(message))
    }

    /// Run `code` in a fresh realm and post its messages to `events`.
    ///
    /// Blocks until the script returns. The realm and the sender are
    /// dropped before this returns, which closes the channel.
    pub fn execute(&self, code: &str, events: UnboundedSender<SandboxMessage>) {
        self.contexts_created.fetch_add(1, Ordering::Relaxed);
        let mut context = Context::default();

        let logs = match install_console(&mut context) {
            Ok(logs) => logs,
            Err(e) => {
                warn!(error = %e, "Failed to install console");
                let _ = events.send(SandboxMessage::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        // Also catches early errors such as a top-level `return`.
        let outcome = context.eval(Source::from_bytes(code));

        let mut messages = collect_logs(&logs, &mut context);
        if let Err(e) = outcome {
            messages.push(SandboxMessage::Error {
                message: describe_thrown(&e, &mut context),
            });
        }

        for message in messages {
            if events.send(message).is_err() {
                debug!("Sandbox listener went away");
                break;
            }
        }

        drop(context);
        debug!("Sandbox realm discarded");
    }
}

/// Bind `console.log` to a host function recording each call in the
/// returned array. Arguments are stringified and joined with a space.
fn install_console(context: &mut Context) -> JsResult<JsArray> {
    let logs = JsArray::new(context);

    let log = NativeFunction::from_copy_closure_with_captures(
        |_this, args, logs, context| {
            let mut parts = Vec::with_capacity(args.len());
            for arg in args {
                parts.push(arg.to_string(context)?.to_std_string_lossy());
            }
            logs.push(JsString::from(parts.join(" ").as_str()), context)?;
            Ok(JsValue::undefined())
        },
        logs.clone(),
    );

    let console = ObjectInitializer::new(context)
        .function(log, js_string!("log"), 0)
        .build();
    context.register_global_property(js_string!("console"), console, Attribute::all())?;

    Ok(logs)
}

fn collect_logs(logs: &JsArray, context: &mut Context) -> Vec<SandboxMessage> {
    let length = match logs.length(context) {
        Ok(length) => u32::try_from(length).unwrap_or(u32::MAX),
        Err(e) => {
            warn!(error = %e, "Failed to read sandbox log");
            return Vec::new();
        }
    };

    let mut messages = Vec::new();
    for index in 0..length {
        match logs
            .get(index, context)
            .and_then(|entry| entry.to_string(context))
        {
            Ok(line) => messages.push(SandboxMessage::Log {
                message: line.to_std_string_lossy(),
            }),
            Err(e) => warn!(error = %e, index, "Skipping unreadable log entry"),
        }
    }
    messages
}

/// The thrown value's `message` when it has one, otherwise the value itself.
fn describe_thrown(error: &JsError, context: &mut Context) -> String {
    let thrown = error.to_opaque(context);
    let described = match thrown.as_object() {
        Some(object) => match object.get(js_string!("message"), context) {
            Ok(message) if !message.is_undefined() => message.to_string(context),
            Ok(_) => thrown.to_string(context),
            Err(e) => Err(e),
        },
        None => thrown.to_string(context),
    };

    described.map_or_else(|_| error.to_string(), |text| text.to_std_string_lossy())
}
