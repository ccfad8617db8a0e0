//! MCP session layer
//!
//! Line-delimited JSON-RPC over worker stdio: transport, wire types, the
//! per-worker session and the manager that attaches sessions to workers.

pub mod client;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use client::McpSession;
pub use manager::SessionManager;
pub use protocol::{
    ResourceContent, ResourceDescriptor, ResourceResult, ServerInfo, ToolContent, ToolDescriptor,
    ToolResult,
};
