//! # Error Handling Module
//!
//! Error types shared by the data model, load balancer, and MCP transport
//! layer. Gateway-level concerns (HTTP status mapping, auth errors) live in
//! `mcp-gateway`'s own `gateway_error` module and wrap these.

use thiserror::Error;

/// Errors raised while dispatching an MCP call over HTTP or stdio.
///
/// `TransportError` covers anything retriable — the request router removes
/// the offending instance from its candidate list and tries the next one.
/// `ProtocolError` means the remote end responded but the response could not
/// be interpreted as MCP; retrying the same instance would not help.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stdio transport error: {message}")]
    Stdio { message: String },

    #[error("subprocess I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("connection pool exhausted for template '{template}'")]
    PoolExhausted { template: String },
}

/// MCP protocol-level errors: the remote end answered, but not usefully.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed MCP response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("MCP response missing expected field '{field}'")]
    MissingField { field: String },

    #[error("MCP endpoint reported an error: {message}")]
    RemoteError { message: String },
}

/// Top-level error for a single dispatch attempt against one instance.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl DispatchError {
    /// Whether this failure is worth retrying against a different instance.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DispatchError::Transport(_))
    }
}

/// Errors raised by registry mutation methods.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid instance: {reason}")]
    InvalidInstance { reason: String },

    #[error("persistence error: {0}")]
    Persistence(String),
}
