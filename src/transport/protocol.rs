//! Agent protocol message types.
//!
//! Length-prefixed JSON protocol between the playground and the Python agent.
//! Messages are framed as: [4-byte BE length][JSON payload]

use serde::{Deserialize, Serialize};

/// Request sent from the playground to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    /// Execute code in the agent's persistent namespace with stdout captured.
    Execute { id: String, code: String },
    /// Graceful shutdown.
    Shutdown,
    /// Health check.
    Ping,
}

/// Response sent from the agent to the playground.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResponse {
    /// Agent is ready to accept requests (sent on startup).
    Ready,
    /// Captured output of one execution, including any exception text.
    Result { id: String, output: String },
    /// Pong response to health check.
    Pong,
    /// The agent could not complete the request.
    Error { message: String },
}
