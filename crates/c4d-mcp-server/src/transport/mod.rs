//! Client-facing MCP transports
//!
//! Exactly one transport runs per process. Each one turns its wire format
//! into JSON-RPC messages for `McpService` and carries the responses back to
//! the caller that sent the request.

pub mod http;
pub mod sse;
pub mod stdio;

use crate::service::McpService;
use crate::settings::HttpSettings;
use async_trait::async_trait;
use c4d_mcp_core::{Result, TransportKind};

pub use http::StreamableHttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// A way for MCP clients to reach the service
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Serve until the client goes away or the process is interrupted,
    /// then close the application link
    async fn serve(self: Box<Self>, service: McpService) -> Result<()>;
}

/// Build the transport selected by `kind`
pub fn build(kind: TransportKind, settings: HttpSettings) -> Box<dyn Transport> {
    match kind {
        TransportKind::Stdio => Box::new(StdioTransport),
        TransportKind::Sse => Box::new(SseTransport::new(settings)),
        TransportKind::StreamableHttp => Box::new(StreamableHttpTransport::new(settings)),
    }
}

/// Resolves on Ctrl-C
pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Interrupt received, shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_selects_transport() {
        for kind in [
            TransportKind::Stdio,
            TransportKind::Sse,
            TransportKind::StreamableHttp,
        ] {
            assert_eq!(build(kind, HttpSettings::default()).kind(), kind);
        }
    }
}
