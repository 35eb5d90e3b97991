//! code-playground library
//!
//! Runs user code in one of two isolation strategies and captures its output:
//! - Python in a persistent agent process with stdout redirected per run
//! - JavaScript in a fresh Boa realm per run, with console output and errors
//!   delivered as messages
//!
//! A [`session::Playground`] holds the language selection, source and output
//! of one session; the MCP server and the CLI drive it.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod mcp;
pub mod session;
pub mod transport;
