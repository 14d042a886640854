//! Cinema 4D MCP Server
//!
//! Bridges MCP clients to the Cinema 4D socket plugin:
//! - stdio for clients that launch this process (Claude Desktop, ...)
//! - SSE at `C4D_MCP_HOST:C4D_MCP_PORT`
//! - streamable HTTP at the same address
//!
//! Cinema 4D is reached at `C4D_HOST:C4D_PORT` (default 127.0.0.1:5555).

use anyhow::{Context, Result};
use c4d_bridge::{LinkConfig, probe};
use c4d_mcp_core::TransportKind;
use c4d_mcp_server::{HttpSettings, McpServer, RouterConfig};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "cinema4d-mcp", version, about = "Start the Cinema 4D MCP server")]
struct Cli {
    /// MCP transport to use: stdio, sse or streamable-http
    #[arg(long, env = "C4D_MCP_TRANSPORT", default_value = "stdio")]
    transport: TransportKind,
}

/// Lines describing how clients reach the chosen transport
fn endpoint_report(transport: TransportKind, settings: &HttpSettings) -> Vec<String> {
    match transport {
        TransportKind::StreamableHttp => {
            let mut lines = vec![format!(
                "MCP Streamable HTTP endpoint: {}",
                settings.streamable_http_url()
            )];
            lines.push(if settings.json_response {
                "Clients POST JSON-RPC (initialize/call_tool) here and receive JSON responses.".into()
            } else {
                "Clients POST JSON-RPC here and must accept Server-Sent Events (text/event-stream) responses.".into()
            });
            lines.push(if settings.stateless_http {
                "Stateless HTTP mode: each request creates an independent MCP session.".into()
            } else {
                "Stateful HTTP mode: reuse the returned mcp-session-id header on subsequent requests.".into()
            });
            lines
        }
        TransportKind::Sse => vec![
            format!("MCP SSE endpoint (GET): {}", settings.sse_url()),
            format!("MCP message POST endpoint: {}", settings.message_url()),
            "Clients connect via SSE for server pushes and POST JSON-RPC to the message endpoint."
                .into(),
        ],
        TransportKind::Stdio => vec![
            "MCP STDIO transport active: connect using a client that launches this process (e.g. Claude Desktop).".into(),
        ],
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the stdio transport
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    info!("========== CINEMA 4D MCP SERVER STARTING ==========");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Ok(dir) = std::env::current_dir() {
        info!("Current directory: {}", dir.display());
    }

    let link = LinkConfig::from_env();
    let router = RouterConfig::from_env();
    let settings = HttpSettings::from_env();

    // Reachability check only; the server starts either way
    info!("Checking connection to Cinema 4D on {}", link.address());
    match probe(&link.host, link.port, PROBE_TIMEOUT).await {
        Ok(()) => info!("Successfully connected to Cinema 4D socket!"),
        Err(e) => {
            warn!("Could not connect to Cinema 4D socket: {}", e);
            warn!("The server will still start, but Cinema 4D integration won't work until the plugin is listening!");
        }
    }

    info!("Starting Cinema 4D MCP Server...");
    for line in endpoint_report(cli.transport, &settings) {
        info!("{}", line);
    }

    McpServer::new(link, router, settings)
        .run(cli.transport)
        .await
        .with_context(|| format!("Cinema 4D MCP server failed on {}", cli.transport))?;

    info!("Cinema 4D MCP server stopped");
    Ok(())
}
