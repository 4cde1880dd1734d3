//! # pocketmcp
//!
//! A resilient Model Context Protocol (MCP) client for embedding in hosts
//! that cannot assume a stable network: mobile shells, editor extensions,
//! desktop agents.
//!
//! The client speaks JSON-RPC 2.0 over a pluggable transport (spawned
//! process stdio, HTTP with the `http` feature, or an in-process double for
//! tests) and layers resilience policy on top of the six host-facing
//! operations:
//!
//! - **Correlation**: every request carries a unique id; responses are
//!   matched by id, and unmatched or duplicate responses are dropped
//!   without affecting other callers.
//! - **Timeouts**: each exchange has a configurable budget; an expired
//!   budget fails that call only.
//! - **Retry**: `call_tool_with_retry` re-attempts transport-class
//!   failures with linear backoff; server answers are terminal on first
//!   occurrence.
//! - **Caching**: resource reads are served from a process-wide TTL cache,
//!   so repeated reads of the same URI cost one network call per TTL
//!   window.
//! - **Offline awareness**: while the [`NetworkMonitor`] reports offline,
//!   cache-miss reads fail fast with no network activity.
//!
//! ## Example
//!
//! ```ignore
//! use pocketmcp::{McpClient, ClientConfig, ServerDescriptor};
//!
//! let client = McpClient::new(ClientConfig::default());
//! client
//!     .connect(ServerDescriptor::stdio("my-mcp-server", &["--port", "0"]))
//!     .await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("{}", tool.name);
//! }
//!
//! let result = client
//!     .call_tool_with_retry("search", serde_json::json!({"query": "rust"}), 3)
//!     .await?;
//!
//! client.disconnect().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod transport;
pub mod types;

pub use cache::{ResourceCache, DEFAULT_TTL};
pub use client::{
    McpClient, McpClientBuilder, ServerDescriptor, Session, SessionState, ToolCallObserver,
};
pub use config::ClientConfig;
pub use connectivity::NetworkMonitor;
pub use error::{McpError, McpResult};
pub use transport::{McpTransport, MemoryTransport, StdioTransport};
pub use types::{
    CallToolResult, Resource, ResourceContent, Tool, ToolResultContent, PROTOCOL_VERSION,
};

#[cfg(feature = "http")]
pub use transport::HttpTransport;

/// Commonly used types.
pub mod prelude {
    pub use crate::cache::ResourceCache;
    pub use crate::client::{McpClient, McpClientBuilder, ServerDescriptor, SessionState};
    pub use crate::config::ClientConfig;
    pub use crate::connectivity::NetworkMonitor;
    pub use crate::error::{McpError, McpResult};
    pub use crate::types::{CallToolResult, Resource, Tool};
}
