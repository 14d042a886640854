//! Transport abstractions for the application socket
//!
//! Provides AsyncReader/AsyncWriter traits for the two halves of a
//! connection and a Connector that opens new connections, so the link can
//! reconnect without knowing which socket type sits underneath.

use crate::protocol::ApplicationResponse;
use async_trait::async_trait;
use c4d_mcp_core::Result;

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read the next complete response frame
    ///
    /// Returns `ConnectionLost` on EOF or socket failure and `Framing` on
    /// malformed data; both end the connection.
    async fn read_response(&mut self) -> Result<ApplicationResponse>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send {
    /// Write one already-framed request in full
    async fn write_frame(&mut self, data: &[u8]) -> Result<()>;

    /// Flush and close the write side
    async fn shutdown(&mut self) -> Result<()>;
}

/// Opens connections to the application
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection, split into its two halves
    async fn connect(&self) -> Result<(Box<dyn AsyncReader>, Box<dyn AsyncWriter>)>;

    /// Human-readable peer description for logs
    fn describe(&self) -> String;
}
