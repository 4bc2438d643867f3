//! # MCP Gateway Core
//!
//! Shared building blocks for the MCP reverse-proxy gateway: the data
//! model (templates, instances, transports), the load balancer that picks
//! an instance per request, and the transport clients that actually speak
//! MCP to a chosen instance.
//!
//! This crate holds no HTTP server, no auth, and no persistence — those
//! live in the `mcp-gateway` binary crate, which depends on this one.
//!
//! ## Overview
//!
//! - [`models`] — `Template`, `Instance`, `Transport`, `LoadBalancerConfig`
//! - [`routing`] — [`routing::LoadBalancer`], the five selection strategies
//! - [`mcp_client`] — [`mcp_client::HttpMcpClient`] and [`mcp_client::StdioMcpClient`]
//! - [`error`] — transport/protocol error types shared by the above
//!
//! ```rust
//! use mcp_gateway_core::models::{Instance, Transport};
//! use mcp_gateway_core::routing::LoadBalancer;
//! use mcp_gateway_core::models::LoadBalancingStrategy;
//!
//! let lb = LoadBalancer::new();
//! let instances = vec![
//!     Instance::new("a", "echo", Transport::Http { endpoint: "http://a".into() }),
//!     Instance::new("b", "echo", Transport::Http { endpoint: "http://b".into() }),
//! ];
//! let chosen = lb.select("echo", &instances, LoadBalancingStrategy::RoundRobin);
//! assert!(chosen.is_some());
//! ```

pub mod error;
pub mod mcp_client;
pub mod models;
pub mod routing;

pub use error::{DispatchError, ProtocolError, RegistryError, TransportError};
pub use mcp_client::{HttpMcpClient, McpClient, McpRequest, McpResponse, StdioMcpClient, StdioPool, StdioPoolRegistry};
pub use models::{
    validate_instance, BackendType, Instance, LoadBalancerConfig, LoadBalancingStrategy, ServerStatus, Template,
    Transport,
};
pub use routing::{LoadBalancer, LoadBalancerStats};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_builder_round_trips_transport_kind() {
        let instance = Instance::new("i1", "echo", Transport::Http { endpoint: "http://h".into() });
        assert_eq!(instance.transport.kind(), "http");
    }

    #[test]
    fn load_balancer_selects_from_single_candidate() {
        let lb = LoadBalancer::new();
        let instances = vec![Instance::new("only", "echo", Transport::Http { endpoint: "http://h".into() })];
        let chosen = lb.select("echo", &instances, LoadBalancingStrategy::RoundRobin).unwrap();
        assert_eq!(chosen.id, "only");
    }

    #[test]
    fn load_balancer_returns_none_for_empty_candidates() {
        let lb = LoadBalancer::new();
        let instances: Vec<Instance> = Vec::new();
        assert!(lb.select("echo", &instances, LoadBalancingStrategy::Random).is_none());
    }
}
