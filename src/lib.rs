//! modular-tools-mcp: an MCP server with a discoverable tool registry
//!
//! Tools are grouped into modules (calculator, files, weather, browser
//! automation, web page rendering, image analysis). Which modules are served
//! is decided at startup by the unit manifests in the tools directory.
//!
//! # Architecture
//!
//! - **Discovery** reads the unit manifests and rebuilds the
//!   [`registry::CapabilityRegistry`] from the built-in module catalog
//! - **The protocol server** performs the MCP handshake and routes
//!   `tools/list` and `tools/call` to the registry
//! - **The session manager** owns the single shared browser session that
//!   stateful tools operate on, one operation at a time
//!
//! # Modules
//!
//! - [`browser`]: Browser driver seam (WebDriver and in-memory drivers)
//! - [`config`]: Configuration loading and validation
//! - [`discovery`]: Tools directory scanning and unit manifests
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol implementation
//! - [`registry`]: Tool descriptors, handlers and the capability registry
//! - [`session`]: The shared browser session
//! - [`tools`]: Built-in tool modules

pub mod browser;
pub mod config;
pub mod discovery;
pub mod error;
pub mod mcp;
pub mod registry;
pub mod session;
pub mod tools;
