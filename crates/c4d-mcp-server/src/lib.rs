//! # c4d-mcp-server
//!
//! MCP server exposing Cinema 4D as a set of tools.
//!
//! This crate provides:
//! - MCP JSON-RPC protocol handling
//! - The Cinema 4D tool catalogue
//! - Request routing onto the shared application link, with deadlines
//! - stdio, SSE and streamable HTTP transports

pub mod mcp;
pub mod router;
pub mod service;
pub mod settings;
pub mod tools;
pub mod transport;

pub use router::{RequestRouter, RouterConfig};
pub use service::McpService;
pub use settings::HttpSettings;
pub use transport::Transport;

use c4d_bridge::{AppLink, LinkConfig};
use c4d_mcp_core::{Result, TransportKind};
use tracing::info;

/// Cinema 4D MCP server
pub struct McpServer {
    service: McpService,
    settings: HttpSettings,
}

impl McpServer {
    /// Create a server; nothing connects until the first tool call
    pub fn new(link: LinkConfig, router: RouterConfig, settings: HttpSettings) -> Self {
        let link = AppLink::new(link);
        Self {
            service: McpService::new(RequestRouter::new(link, router)),
            settings,
        }
    }

    /// Serve on the chosen transport until it ends
    pub async fn run(self, kind: TransportKind) -> Result<()> {
        let transport = transport::build(kind, self.settings);
        info!("Starting Cinema 4D MCP server on {}", transport.kind());
        transport.serve(self.service).await
    }
}
