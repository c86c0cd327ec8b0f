//! MCP (Model Context Protocol) client for Tasklink tool servers.
//!
//! A tool server is spawned as a child process and spoken to with
//! newline-delimited JSON-RPC 2.0 over its stdin/stdout. Many requests may be
//! in flight at once; replies are matched to callers by request id. Each
//! session must complete the initialize handshake before tools can be listed
//! or called.

pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod framer;
pub mod jsonrpc;
pub mod transport;

pub use client::{
    Implementation, InitializeResult, McpClient, PROTOCOL_VERSION, ToolCallResult, ToolContent,
    ToolDescriptor,
};
pub use config::McpServerConfig;
pub use error::McpError;
pub use transport::StdioTransport;
