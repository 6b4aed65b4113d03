//! YouTrack MCP server binary.
//!
//! This binary runs the MCP server using stdio transport.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use youtrack_gateway::GatewayConfig;
use youtrack_gateway_mcp::YouTrackMcpServer;

/// Serve YouTrack issue operations over MCP (stdio).
///
/// Connection settings come from `YOUTRACK_*` environment variables,
/// optionally layered over a YAML config file.
#[derive(Debug, Parser)]
#[command(name = "youtrack-gateway-mcp", version, about)]
struct Args {
    /// YAML config file; environment variables override its values.
    #[arg(short, long, env = "YOUTRACK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::from_env()?,
    };

    tracing::info!(config = ?config, "Starting youtrack-gateway-mcp server");

    let server = YouTrackMcpServer::from_config(&config)?;
    server.run().await?;

    Ok(())
}
