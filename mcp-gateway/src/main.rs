//! # MCP Gateway Binary
//!
//! Binary entry point for the reverse-proxy gateway. Parses arguments,
//! loads configuration, builds the server, and serves until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! mcp-gateway
//! mcp-gateway --config my-gateway.toml
//! mcp-gateway --host 0.0.0.0 --port 8080
//! mcp-gateway --log-level debug
//! ```
//!
//! ## Exit Codes
//!
//! - `0` — graceful shutdown (SIGINT handled, in-flight requests drained)
//! - `1` — startup failure (bad config, bind failure)
//! - `130` — shutdown via Ctrl+C (standard `128 + SIGINT`)

use clap::Parser;
use mcp_gateway::{config::Config, server::create_server};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: String,

    /// Port number for the HTTP server.
    #[arg(short, long)]
    port: Option<u16>,

    /// Host address to bind the server to.
    #[arg(long)]
    host: Option<String>,

    /// Logging level for the application.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    match run(args).await {
        Ok(true) => ExitCode::from(130),
        Ok(false) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "gateway exited with an error");
            ExitCode::from(1)
        }
    }
}

/// Runs the server to completion. Returns `Ok(true)` if shutdown was
/// triggered by Ctrl+C, so `main` can exit `130` rather than `0` —
/// distinguishing "asked to stop" from "stopped on its own" for anyone
/// scripting around this process.
async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let app = create_server(config.clone()).await?;

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!("starting mcp-gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let interrupted = Arc::new(AtomicBool::new(false));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(interrupted.clone()))
        .await?;

    tracing::info!("gateway shut down gracefully");
    Ok(interrupted.load(Ordering::SeqCst))
}

async fn shutdown_signal(interrupted: Arc<AtomicBool>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("received Ctrl+C, shutting down");
        interrupted.store(true, Ordering::SeqCst);
    }
}
