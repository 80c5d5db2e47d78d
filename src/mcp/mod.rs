//! Model Context Protocol (MCP) server implementation.
//!
//! The server speaks JSON-RPC 2.0 over a newline-delimited transport (stdio
//! by default) and exposes the tools in the capability registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │   │  Transport  │───▶│   Server    │───▶│  Dispatcher  │     │
//! │   │   (stdio)   │    │ (lifecycle) │    │  (registry)  │     │
//! │   └─────────────┘    └─────────────┘    └──────────────┘     │
//! │                             │                  │             │
//! │                             ▼                  ▼             │
//! │                      ┌─────────────┐    ┌──────────────┐     │
//! │                      │  Discovery  │    │   Handlers   │     │
//! │                      └─────────────┘    │  + Session   │     │
//! │                                         └──────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.

pub mod dispatch;
pub mod protocol;
pub mod server;
pub mod transport;

pub use dispatch::{DispatchError, ToolDispatcher};
pub use protocol::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolCallResult, MCP_PROTOCOL_VERSION,
};
pub use server::{ControlEvent, McpServer, ServerState};
pub use transport::{Transport, TransportError};
