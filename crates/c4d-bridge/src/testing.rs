//! Scriptable stand-in for the Cinema 4D plugin socket
//!
//! Binds an ephemeral local port, decodes each command and answers according
//! to a handler. Used by this crate's tests and, through the `test-util`
//! feature, by the server crate's end-to-end tests.

use crate::backoff::BackoffConfig;
use crate::config::LinkConfig;
use crate::protocol::{ApplicationFrame, ApplicationResponse, CommandCodec, Decoded, Framing};
use bytes::{Bytes, BytesMut};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

/// What the fake application does with one command
pub enum Reply {
    Respond(ApplicationResponse),
    /// Answer after a pause; other commands keep flowing meanwhile
    Delayed(Duration, ApplicationResponse),
    /// Write these bytes verbatim (for malformed-frame tests)
    Raw(Bytes),
    /// Never answer
    Ignore,
    /// Drop the connection
    Disconnect,
}

type Handler = Arc<dyn Fn(&ApplicationFrame) -> Reply + Send + Sync>;

/// A fake Cinema 4D listening on 127.0.0.1
pub struct FakeCinema4d {
    addr: SocketAddr,
    codec: CommandCodec,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<ApplicationFrame>>>,
    accept_task: JoinHandle<()>,
}

impl FakeCinema4d {
    /// Start a server that answers through `handler`
    pub async fn start<F>(framing: Framing, handler: F) -> std::io::Result<Self>
    where
        F: Fn(&ApplicationFrame) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let codec = CommandCodec::new(framing);
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let accept_task = {
            let connections = connections.clone();
            let received = received.clone();
            tokio::spawn(async move {
                // Dropping the set (when this task is aborted) drops every socket
                let mut sessions = JoinSet::new();
                while let Ok((stream, peer)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    debug!("Fake Cinema 4D accepted {}", peer);
                    sessions.spawn(serve_connection(
                        stream,
                        codec,
                        handler.clone(),
                        received.clone(),
                    ));
                }
            })
        };

        Ok(Self {
            addr,
            codec,
            connections,
            received,
            accept_task,
        })
    }

    /// Start a server that answers every command with its own name and arguments
    pub async fn echo() -> std::io::Result<Self> {
        Self::start(Framing::Ndjson, |frame| Reply::Respond(echo_response(frame))).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Link settings pointing at this server, with a short reconnect schedule
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            framing: self.codec.framing(),
            connect_timeout: Duration::from_secs(2),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(200),
                multiplier: 2.0,
                jitter: 0.0,
                max_attempts: Some(50),
            },
            ..LinkConfig::default()
        }
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Every command decoded so far, in arrival order
    pub fn received(&self) -> Vec<ApplicationFrame> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Stop listening and drop every open connection
    pub fn stop(&self) {
        self.accept_task.abort();
    }
}

impl Drop for FakeCinema4d {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// `{"command": .., "arguments": {..}}` for `frame`
pub fn echo_response(frame: &ApplicationFrame) -> ApplicationResponse {
    ApplicationResponse::success(
        frame.tag,
        json!({
            "command": frame.command,
            "arguments": Value::Object(frame.arguments.clone()),
        }),
    )
}

async fn serve_connection(
    stream: TcpStream,
    codec: CommandCodec,
    handler: Handler,
    received: Arc<Mutex<Vec<ApplicationFrame>>>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let mut tasks = JoinSet::new();
    tasks.spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(8 * 1024);
    let mut scanned = 0;
    loop {
        let frame = match codec.decode_request_from(&mut buf, &mut scanned) {
            Ok(Decoded::Frame(frame)) => frame,
            Ok(Decoded::Partial) => match read_half.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            },
            Err(e) => {
                debug!("Fake Cinema 4D dropping connection: {}", e);
                return;
            }
        };

        received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(frame.clone());

        match handler(&frame) {
            Reply::Respond(response) => queue_response(&tx, codec, &response),
            Reply::Delayed(delay, response) => {
                let tx = tx.clone();
                tasks.spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue_response(&tx, codec, &response);
                });
            }
            Reply::Raw(bytes) => {
                let _ = tx.send(bytes);
            }
            Reply::Ignore => {}
            Reply::Disconnect => return,
        }
    }
}

fn queue_response(tx: &mpsc::UnboundedSender<Bytes>, codec: CommandCodec, response: &ApplicationResponse) {
    match codec.encode_response(response) {
        Ok(bytes) => {
            let _ = tx.send(bytes);
        }
        Err(e) => debug!("Fake Cinema 4D could not encode response: {}", e),
    }
}
