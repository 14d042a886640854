//! stdio transport for MCP JSON-RPC
//!
//! One newline-delimited JSON-RPC message per line. Every request runs in
//! its own task, so a slow render does not hold up a quick query; responses
//! are written in completion order through one shared writer.

use crate::mcp::Response;
use crate::service::McpService;
use crate::transport::Transport;
use async_trait::async_trait;
use c4d_mcp_core::{BridgeError, CallOrigin, Result, TransportKind};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Serves the process's own stdin/stdout
pub struct StdioTransport;

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn serve(self: Box<Self>, service: McpService) -> Result<()> {
        run(service, tokio::io::stdin(), tokio::io::stdout()).await
    }
}

/// Run the MCP session over `input`/`output` until EOF
///
/// On EOF in-flight calls are aborted and the application link is closed.
pub async fn run<R, W>(service: McpService, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(output));
    let mut lines = BufReader::new(input).lines();
    let origin = CallOrigin::new(TransportKind::Stdio);
    let mut in_flight = JoinSet::new();

    info!("Cinema 4D MCP server running on stdio");

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    debug!("Received: {}", trimmed);

                    let message = trimmed.to_string();
                    let service = service.clone();
                    let writer = writer.clone();
                    let origin = origin.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = service.handle_message(&message, &origin).await {
                            if let Err(e) = write_response(&writer, &response).await {
                                error!("Failed to write response: {}", e);
                            }
                        }
                    });
                }
                Ok(None) => {
                    // EOF - client disconnected
                    info!("Client disconnected (EOF)");
                    break Ok(());
                }
                Err(e) => break Err(BridgeError::Io(format!("Failed to read stdin: {}", e))),
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Request handler panicked: {}", e);
                    }
                }
            }
        }
    };

    if !in_flight.is_empty() {
        info!("Aborting {} in-flight requests", in_flight.len());
    }
    in_flight.shutdown().await;
    service.router().shutdown().await;

    outcome
}

async fn write_response<W>(writer: &Mutex<W>, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    debug!("Sending: {}", json.trim_end());

    let mut out = writer.lock().await;
    out.write_all(json.as_bytes())
        .await
        .map_err(|e| BridgeError::Io(format!("Failed to write stdout: {}", e)))?;
    out.flush()
        .await
        .map_err(|e| BridgeError::Io(format!("Failed to flush stdout: {}", e)))?;
    Ok(())
}
