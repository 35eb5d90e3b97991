//! MCP server implementation using rmcp.
//!
//! Exposes the playground controls (select language, Run, Clear, read
//! output) as MCP tools over one session.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::bridge::Language;
use crate::session::Playground;

/// MCP server driving one playground session.
#[derive(Clone)]
pub struct PlaygroundServer {
    playground: Arc<Playground>,
    tool_router: ToolRouter<Self>,
}

/// Parameters for the run tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunParams {
    /// Language to run the code in ("python" or "javascript").
    #[schemars(description = "Language to run the code in: 'python' or 'javascript'")]
    pub language: String,

    /// Source code to run.
    #[schemars(description = "The source code to run")]
    pub code: String,
}

/// Parameters for the select_language tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SelectLanguageParams {
    /// Language to select ("python" or "javascript").
    #[schemars(description = "Language to select: 'python' or 'javascript'")]
    pub language: String,
}

fn parse_language(value: &str) -> Result<Language, McpError> {
    value
        .parse::<Language>()
        .map_err(|e| McpError::invalid_params(e.to_string(), None))
}

#[tool_router]
impl PlaygroundServer {
    /// Create a new playground server.
    pub fn new(playground: Arc<Playground>) -> Self {
        Self {
            playground,
            tool_router: Self::tool_router(),
        }
    }

    /// Select the language, replace the source, run it and return the output.
    #[tool(description = "Run code in the playground and return its captured output")]
    async fn run(
        &self,
        Parameters(params): Parameters<RunParams>,
    ) -> Result<CallToolResult, McpError> {
        let language = parse_language(&params.language)?;

        info!(language = %language, code_len = params.code.len(), "Run requested");

        let handle = self.playground.submit(language, params.code).await;
        if !handle.is_pending() && language == Language::Python {
            return Ok(CallToolResult::error(vec![Content::text(
                "Python interpreter is still loading; the run was ignored",
            )]));
        }

        handle.finished().await;
        Ok(CallToolResult::success(vec![Content::text(
            self.playground.output(),
        )]))
    }

    /// Change the selected language without running anything.
    #[tool(description = "Select the playground language without running code")]
    async fn select_language(
        &self,
        Parameters(params): Parameters<SelectLanguageParams>,
    ) -> Result<CallToolResult, McpError> {
        let language = parse_language(&params.language)?;
        self.playground.select_language(language).await;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Selected {language}"
        ))]))
    }

    /// Reset source and output.
    #[tool(description = "Clear the playground source and output")]
    async fn clear(&self) -> Result<CallToolResult, McpError> {
        self.playground.clear().await;
        Ok(CallToolResult::success(vec![Content::text("Cleared")]))
    }

    /// Read the current output without running anything.
    #[tool(description = "Return the playground's current output")]
    async fn output(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(
            self.playground.output(),
        )]))
    }
}

#[tool_handler]
impl ServerHandler for PlaygroundServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "code-playground".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Run Python or JavaScript in an isolated playground session.\n\
                 \n\
                 Use the 'run' tool with:\n\
                 - language: 'python' or 'javascript'\n\
                 - code: the code to run\n\
                 Python state persists between runs; each JavaScript run starts fresh."
                    .into(),
            ),
        }
    }
}

/// Serve the playground over stdio.
pub async fn serve_stdio(playground: Arc<Playground>) -> anyhow::Result<()> {
    let server = PlaygroundServer::new(Arc::clone(&playground));

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    let served = service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"));

    playground.shutdown().await;
    served?;

    Ok(())
}
