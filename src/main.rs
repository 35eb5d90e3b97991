//! code-playground
//!
//! Runs Python or JavaScript snippets with captured output, either as an MCP
//! server over stdio or once from the command line.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use code_playground::{bridge::Language, config::Config, mcp, session::Playground};

#[derive(Parser, Debug)]
#[command(name = "code-playground")]
#[command(about = "Run Python or JavaScript snippets with captured output")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long)]
    stdio: bool,

    /// Configuration file (JSON); defaults to PLAYGROUND_CONFIG or built-ins
    #[arg(long)]
    config: Option<PathBuf>,

    /// Language for a one-shot run (python, javascript)
    #[arg(long)]
    language: Option<Language>,

    /// Source file for a one-shot run ("-" reads stdin)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol and output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!(
        default_language = %config.default_language,
        python = %config.python.executable,
        "Loaded configuration"
    );

    let playground = Arc::new(Playground::start(&config));

    if args.stdio {
        mcp::serve_stdio(playground).await?;
    } else if let Some(file) = args.file {
        let language = args.language.unwrap_or(config.default_language);
        let source = read_source(&file)?;
        run_once(&playground, language, source).await?;
        playground.shutdown().await;
    } else {
        anyhow::bail!("Nothing to do: pass --stdio or --file <path>");
    }

    Ok(())
}

fn read_source(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read source from stdin")?;
        return Ok(source);
    }

    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

async fn run_once(playground: &Playground, language: Language, source: String) -> Result<()> {
    if language == Language::Python && !playground.wait_for_interpreter().await {
        anyhow::bail!("Python interpreter failed to load (see log for details)");
    }

    playground.submit(language, source).await.finished().await;

    let output = playground.output();
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.is_empty() && !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    if let Err(e) = stdout.flush() {
        warn!(error = %e, "Failed to flush output");
    }

    Ok(())
}
