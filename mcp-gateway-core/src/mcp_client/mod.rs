//! # MCP Client Layer
//!
//! Transport-specific clients that speak the Model Context Protocol to a
//! single backend instance. The gateway never interprets `params`/`result`
//! payloads — they are forwarded opaquely as `serde_json::Value`.

mod http;
mod stdio;

pub use http::HttpMcpClient;
pub use stdio::{StdioMcpClient, StdioPool, StdioPoolRegistry};

use crate::error::DispatchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON-RPC-shaped MCP request. The gateway fills `id` itself so callers
/// never have to worry about collisions across concurrent in-flight calls.
#[derive(Debug, Clone, Serialize)]
pub struct McpRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<McpErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Implemented once per transport kind. The request router holds a
/// `Box<dyn McpClient>` per instance (or constructs one on demand for HTTP,
/// which is stateless) and calls `dispatch` without knowing which
/// transport it is talking to.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn dispatch(&self, request: McpRequest) -> Result<Value, DispatchError>;
}
