//! # MCP Gateway
//!
//! A unified reverse-proxy gateway for Model Context Protocol servers.
//! Registers MCP server instances under named templates, load-balances
//! requests across healthy instances, forwards MCP calls verbatim over
//! HTTP or stdio transports, and probes instance health in the background.
//!
//! ## Architecture
//!
//! - [`registry`] — in-memory template/instance store, persisted through
//!   [`persistence`]
//! - [`router`] — picks an instance via `mcp_gateway_core::LoadBalancer`
//!   and dispatches one MCP call, retrying on transport failure
//! - [`health`] — periodic background health sweep over every instance
//! - [`auth`] — bearer JWT and API key authentication
//! - [`config`] — TOML + environment configuration, with validation
//! - [`server`] — wires everything into an Axum [`axum::Router`]
//! - [`handlers`] — the HTTP route table
//! - [`middleware`] — CORS, auth, and request logging layers
//! - [`gateway_error`] — the single error type every handler returns
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcp_gateway::{config::Config, server::create_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("gateway.toml")?;
//!     let app = create_server(config).await?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod gateway_error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod persistence;
pub mod registry;
pub mod router;
pub mod server;

pub use server::create_server;
