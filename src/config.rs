//! Playground configuration.
//!
//! Configuration is JSON, read from a file given on the command line or
//! inline from the `PLAYGROUND_CONFIG` environment variable. Every field has
//! a default, so an empty object (or no configuration at all) is valid.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::bridge::Language;

/// Top-level configuration for the playground.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Language selected when a session starts.
    #[serde(default)]
    pub default_language: Language,

    /// Locale of the error labels written into the output buffer.
    #[serde(default)]
    pub locale: Locale,

    /// How to start the Python agent.
    #[serde(default)]
    pub python: PythonConfig,
}

/// Python agent process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PythonConfig {
    /// Python executable used to run the agent.
    #[serde(default = "default_python_executable")]
    pub executable: String,

    /// Extra interpreter arguments placed before the agent bootstrap.
    #[serde(default)]
    pub args: Vec<String>,

    /// How long to wait for the agent's Ready handshake, in seconds.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_seconds: u64,
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            executable: default_python_executable(),
            args: Vec::new(),
            ready_timeout_seconds: default_ready_timeout(),
        }
    }
}

/// Locale of the fixed error labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ru,
    En,
}

/// Fixed prefixes written in front of failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Labels {
    /// Engine-level failure on the interpreted path.
    pub python_error: &'static str,
    /// Error reported from inside the script sandbox.
    pub script_error: &'static str,
    /// Script rejected by the syntax pre-check.
    pub script_syntax_error: &'static str,
}

impl Locale {
    pub const fn labels(self) -> Labels {
        match self {
            Self::Ru => Labels {
                python_error: "Ошибка выполнения Python: ",
                script_error: "Ошибка выполнения JS: ",
                script_syntax_error: "Ошибка синтаксиса в JS: ",
            },
            Self::En => Labels {
                python_error: "Python execution error: ",
                script_error: "JS execution error: ",
                script_syntax_error: "JS syntax error: ",
            },
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Priority: `path` (if given) > `PLAYGROUND_CONFIG` env var > defaults.
    /// `PLAYGROUND_PYTHON` overrides the agent executable in every case.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env()?,
        };

        if let Ok(executable) = std::env::var("PLAYGROUND_PYTHON") {
            debug!(executable = %executable, "Python executable overridden by PLAYGROUND_PYTHON");
            config.python.executable = executable;
        }

        Ok(config)
    }

    /// Load configuration from the `PLAYGROUND_CONFIG` environment variable,
    /// falling back to defaults when it is not set.
    pub fn from_env() -> Result<Self> {
        match std::env::var("PLAYGROUND_CONFIG") {
            Ok(json) => Self::from_json(&json).context("Failed to parse PLAYGROUND_CONFIG"),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_json(&json)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid configuration JSON")?;
        Ok(config)
    }

    /// Labels for the configured locale.
    pub const fn labels(&self) -> Labels {
        self.locale.labels()
    }
}

fn default_python_executable() -> String {
    "python3".into()
}

const fn default_ready_timeout() -> u64 {
    30
}
