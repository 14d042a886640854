//! TCP transport implementation for the Cinema 4D socket
//!
//! The plugin inside Cinema 4D listens on a plain TCP port (default 5555).

use crate::protocol::{ApplicationResponse, CommandCodec, Decoded};
use crate::transport::{AsyncReader, AsyncWriter, Connector};
use async_trait::async_trait;
use bytes::BytesMut;
use c4d_mcp_core::{BridgeError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

const READ_CHUNK: usize = 8 * 1024;

/// TCP read wrapper that buffers partial frames
pub struct TcpReadWrapper<R = OwnedReadHalf> {
    inner: R,
    codec: CommandCodec,
    buffer: BytesMut,
    // Prefix of `buffer` already searched for a line terminator
    scanned: usize,
}

impl<R> TcpReadWrapper<R> {
    pub fn new(inner: R, codec: CommandCodec) -> Self {
        Self {
            inner,
            codec,
            buffer: BytesMut::with_capacity(64 * 1024),
            scanned: 0,
        }
    }
}

#[async_trait]
impl<R> AsyncReader for TcpReadWrapper<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_response(&mut self) -> Result<ApplicationResponse> {
        loop {
            let decoded = self.codec.decode_from(&mut self.buffer, &mut self.scanned)?;
            if let Decoded::Frame(response) = decoded {
                return Ok(response);
            }

            self.buffer.reserve(READ_CHUNK);
            let n = self
                .inner
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| BridgeError::ConnectionLost(format!("TCP read failed: {}", e)))?;

            if n == 0 {
                return Err(BridgeError::ConnectionLost(if self.buffer.is_empty() {
                    "Cinema 4D closed the connection".to_string()
                } else {
                    format!(
                        "Cinema 4D closed the connection mid-frame ({} bytes buffered)",
                        self.buffer.len()
                    )
                }));
            }
        }
    }
}

/// TCP write wrapper
pub struct TcpWriteWrapper<W = OwnedWriteHalf>(pub W);

#[async_trait]
impl<W> AsyncWriter for TcpWriteWrapper<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        self.0
            .write_all(data)
            .await
            .map_err(|e| BridgeError::ConnectionLost(format!("TCP write failed: {}", e)))?;

        // Flush to ensure data is sent
        self.0
            .flush()
            .await
            .map_err(|e| BridgeError::ConnectionLost(format!("TCP flush failed: {}", e)))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.0
            .shutdown()
            .await
            .map_err(|e| BridgeError::Io(format!("TCP shutdown failed: {}", e)))
    }
}

/// Opens TCP connections to the Cinema 4D plugin
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    codec: CommandCodec,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, codec: CommandCodec) -> Self {
        Self {
            address: address.into(),
            codec,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<(Box<dyn AsyncReader>, Box<dyn AsyncWriter>)> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| BridgeError::Connect(format!("{}: {}", self.address, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| BridgeError::Connect(format!("{}: {}", self.address, e)))?;

        let (read_half, write_half) = stream.into_split();
        Ok((
            Box::new(TcpReadWrapper::new(read_half, self.codec)),
            Box::new(TcpWriteWrapper(write_half)),
        ))
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}

/// Check that something accepts TCP connections at `host:port`
///
/// The connection is closed straight away; nothing is sent.
pub async fn probe(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let address = format!("{}:{}", host, port);
    match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(BridgeError::Connect(format!("{}: {}", address, e))),
        Err(_) => Err(BridgeError::Connect(format!(
            "{}: timed out after {}s",
            address,
            timeout.as_secs_f32()
        ))),
    }
}
