//! Application link: the one shared connection to Cinema 4D
//!
//! `AppLink` owns the socket and the table of commands waiting for a
//! response. Each Ready connection runs two background tasks:
//! - a writer task, the only code that touches the write half; callers hand
//!   it complete frames through a channel, so frames never interleave and a
//!   caller that gives up mid-send cannot leave half a frame on the wire
//! - a reader task that decodes responses and routes them to waiters by tag
//!
//! When either task hits an error every waiter on that connection fails with
//! `ConnectionLost` and a background reconnect loop starts.

use crate::backoff::Backoff;
use crate::config::{AdmissionPolicy, LinkConfig};
use crate::pending::PendingTable;
use crate::protocol::{ApplicationFrame, ApplicationResponse, CommandCodec, preview};
use crate::tcp::TcpConnector;
use crate::transport::{AsyncReader, AsyncWriter, Connector};
use bytes::Bytes;
use c4d_mcp_core::{Arguments, BridgeError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Frames buffered between callers and the writer task
const OUTBOUND_CAPACITY: usize = 64;

/// How long `close` waits for queued frames to be written
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of the application connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    /// `close` is flushing queued frames
    Draining,
    /// Terminal; the link accepts no more commands
    Closed,
}

/// Handle to the shared Cinema 4D connection
///
/// Cloning is cheap; every clone drives the same connection.
#[derive(Clone)]
pub struct AppLink {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    config: LinkConfig,
    codec: CommandCodec,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    connection: Mutex<Option<Connection>>,
    pending: Mutex<PendingTable>,
    next_tag: AtomicU64,
    next_epoch: AtomicU64,
    /// Serializes connection attempts
    connect_lock: tokio::sync::Mutex<()>,
    /// Bumped on every connection attempt
    attempts: AtomicU64,
    last_connect_error: Mutex<Option<BridgeError>>,
    reconnecting: AtomicBool,
    queued: AtomicUsize,
    closed: AtomicBool,
}

struct Connection {
    epoch: u64,
    outbound: mpsc::Sender<Outbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Outbound {
    tag: u64,
    data: Bytes,
}

/// A command that has been sent and is waiting for its response
///
/// Dropping the handle withdraws the wait; a response that arrives later is
/// logged as unmatched and discarded.
pub struct PendingResponse {
    tag: u64,
    rx: oneshot::Receiver<Result<ApplicationResponse>>,
    link: Weak<LinkInner>,
}

impl PendingResponse {
    /// Correlation tag of the outstanding frame
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Wait for the response, connection loss or shutdown
    pub async fn wait(mut self) -> Result<ApplicationResponse> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::ConnectionLost(
                "response channel closed".into(),
            )),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(link) = self.link.upgrade() {
            if lock(&link.pending).cancel(self.tag) {
                debug!(tag = self.tag, "Caller stopped waiting for response");
            }
        }
    }
}

impl AppLink {
    /// Create a link to the TCP address in `config` (not connected yet)
    pub fn new(config: LinkConfig) -> Self {
        let codec = CommandCodec::new(config.framing).with_max_frame_size(config.max_frame_size);
        let connector = Arc::new(TcpConnector::new(config.address(), codec));
        Self::with_connector(config, connector)
    }

    /// Create a link that opens connections through `connector`
    pub fn with_connector(config: LinkConfig, connector: Arc<dyn Connector>) -> Self {
        let codec = CommandCodec::new(config.framing).with_max_frame_size(config.max_frame_size);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(LinkInner {
                config,
                codec,
                connector,
                state,
                connection: Mutex::new(None),
                pending: Mutex::new(PendingTable::new()),
                next_tag: AtomicU64::new(1),
                next_epoch: AtomicU64::new(0),
                connect_lock: tokio::sync::Mutex::new(()),
                attempts: AtomicU64::new(0),
                last_connect_error: Mutex::new(None),
                reconnecting: AtomicBool::new(false),
                queued: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Open the connection (one attempt)
    ///
    /// On failure a background reconnect loop is scheduled and the
    /// `ConnectError` is returned.
    pub async fn connect(&self) -> Result<()> {
        let result = self.inner.connect_once(false).await;
        if let Err(BridgeError::Connect(_)) = &result {
            self.inner.schedule_reconnect();
        }
        result
    }

    /// Send a command and return a handle to wait on its response
    pub async fn send(
        &self,
        command: impl Into<String>,
        arguments: Arguments,
    ) -> Result<PendingResponse> {
        self.inner.ensure_ready().await?;

        let tag = self.inner.next_tag.fetch_add(1, Ordering::SeqCst);
        let frame = ApplicationFrame {
            tag,
            command: command.into(),
            arguments,
        };
        let data = self.inner.codec.encode(&frame)?;

        let (outbound, rx) = loop {
            let registered = {
                let slot = lock(&self.inner.connection);
                match slot.as_ref() {
                    Some(conn) => {
                        // Registered while the connection slot is held, so a
                        // concurrent loss either fails this entry or we see
                        // no connection
                        let (tx, rx) = oneshot::channel();
                        lock(&self.inner.pending).insert(tag, conn.epoch, tx)?;
                        Some((conn.outbound.clone(), rx))
                    }
                    None => None,
                }
            };
            match registered {
                Some(registered) => break registered,
                // Lost between the readiness check and now
                None => {
                    tokio::task::yield_now().await;
                    self.inner.ensure_ready().await?;
                }
            }
        };

        let handle = PendingResponse {
            tag,
            rx,
            link: Arc::downgrade(&self.inner),
        };

        debug!(tag, command = %frame.command, "[Bridge→C4D] len={} json={}", data.len(), preview(&data));
        outbound
            .send(Outbound { tag, data })
            .await
            .map_err(|_| BridgeError::ConnectionLost("writer task stopped".into()))?;

        Ok(handle)
    }

    /// Flush queued frames, close the socket and release every waiter
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.state.send_replace(ConnectionState::Draining);

        let conn = lock(&self.inner.connection).take();
        if let Some(Connection {
            epoch,
            outbound,
            reader,
            mut writer,
        }) = conn
        {
            // Dropping our sender lets the writer finish the queue and exit
            drop(outbound);
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut writer).await.is_err() {
                warn!(epoch, "Writer did not drain in time, aborting");
                writer.abort();
            }
            reader.abort();
        }

        let released = lock(&self.inner.pending).fail_all(|| BridgeError::Shutdown);
        self.inner.state.send_replace(ConnectionState::Closed);
        info!("Cinema 4D link closed ({} waiters released)", released);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of commands waiting for a response
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }
}

impl LinkInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next || matches!(*current, ConnectionState::Closed | ConnectionState::Draining) {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Wait until a command may be written, per the admission policy
    async fn ensure_ready(self: &Arc<Self>) -> Result<()> {
        let mut state_rx = self.state.subscribe();
        let mut slot: Option<QueueSlot> = None;

        loop {
            if self.is_closed() {
                return Err(BridgeError::Shutdown);
            }

            let state = *state_rx.borrow_and_update();
            let reconnecting = self.reconnecting.load(Ordering::SeqCst);

            match state {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Draining | ConnectionState::Closed => {
                    return Err(BridgeError::Shutdown);
                }
                // Idle or another caller's lazy attempt: connect (or share theirs)
                ConnectionState::Disconnected | ConnectionState::Connecting if !reconnecting => {
                    return match self.connect_once(true).await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            if matches!(e, BridgeError::Connect(_)) {
                                self.schedule_reconnect();
                            }
                            Err(e)
                        }
                    };
                }
                // Background reconnect in progress
                _ => match self.config.admission {
                    AdmissionPolicy::FailFast => return Err(BridgeError::NotConnected),
                    AdmissionPolicy::Queue { max_pending } => {
                        if slot.is_none() {
                            slot = Some(QueueSlot::acquire(self, max_pending).ok_or(BridgeError::Busy)?);
                            debug!("Queued command until Cinema 4D reconnects");
                        }
                        if state_rx.changed().await.is_err() {
                            return Err(BridgeError::Shutdown);
                        }
                    }
                },
            }
        }
    }

    /// Make one connection attempt
    ///
    /// With `share_in_flight`, a caller that had to wait for someone else's
    /// attempt reuses that attempt's outcome instead of trying again.
    async fn connect_once(self: &Arc<Self>, share_in_flight: bool) -> Result<()> {
        let observed = self.attempts.load(Ordering::SeqCst);
        let _guard = self.connect_lock.lock().await;

        if self.is_closed() {
            return Err(BridgeError::Shutdown);
        }
        if *self.state.borrow() == ConnectionState::Ready {
            return Ok(());
        }
        if share_in_flight && self.attempts.load(Ordering::SeqCst) != observed {
            return Err(lock(&self.last_connect_error)
                .clone()
                .unwrap_or(BridgeError::NotConnected));
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);
        let mut reset = StateReset {
            link: self,
            armed: true,
        };

        let target = self.connector.describe();
        info!("Connecting to Cinema 4D at {}", target);

        let attempt = tokio::time::timeout(self.config.connect_timeout, self.connector.connect()).await;
        let (reader, writer) = match attempt {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                let e = match e {
                    BridgeError::Connect(_) => e,
                    other => BridgeError::Connect(other.to_string()),
                };
                warn!("Could not connect to Cinema 4D: {}", e);
                *lock(&self.last_connect_error) = Some(e.clone());
                return Err(e);
            }
            Err(_) => {
                let e = BridgeError::Connect(format!(
                    "{}: timed out after {}s",
                    target,
                    self.config.connect_timeout.as_secs_f32()
                ));
                warn!("Could not connect to Cinema 4D: {}", e);
                *lock(&self.last_connect_error) = Some(e.clone());
                return Err(e);
            }
        };

        reset.armed = false;
        self.install(reader, writer)
    }

    /// Start the reader and writer tasks for a fresh connection
    fn install(self: &Arc<Self>, reader: Box<dyn AsyncReader>, writer: Box<dyn AsyncWriter>) -> Result<()> {
        let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let mut slot = lock(&self.connection);
        if self.is_closed() {
            return Err(BridgeError::Shutdown);
        }

        // Tasks are spawned under the slot lock so a task that fails
        // immediately cannot report loss before the connection is recorded
        let reader = tokio::spawn(read_loop(Arc::downgrade(self), reader, epoch));
        let writer = tokio::spawn(write_loop(Arc::downgrade(self), writer, outbound_rx, epoch));
        *slot = Some(Connection {
            epoch,
            outbound,
            reader,
            writer,
        });
        self.set_state(ConnectionState::Ready);
        drop(slot);

        *lock(&self.last_connect_error) = None;
        info!(epoch, "Connected to Cinema 4D at {}", self.connector.describe());
        Ok(())
    }

    /// Tear down connection `epoch` after a socket failure
    fn connection_lost(self: &Arc<Self>, epoch: u64, reason: BridgeError) {
        let conn = {
            let mut slot = lock(&self.connection);
            match slot.as_ref() {
                Some(conn) if conn.epoch == epoch => slot.take(),
                _ => None,
            }
        };
        let Some(conn) = conn else {
            return;
        };

        conn.reader.abort();
        conn.writer.abort();

        // State moves before waiters wake, so a caller retrying on
        // ConnectionLost sees the reconnect in progress
        if !self.is_closed() {
            self.set_state(ConnectionState::Disconnected);
            self.schedule_reconnect();
        }

        let message = reason.to_string();
        let failed = lock(&self.pending).fail_epoch(epoch, || {
            BridgeError::ConnectionLost(message.clone())
        });
        error!(epoch, failed, "Lost connection to Cinema 4D: {}", reason);
    }

    /// Start the background reconnect loop unless one is running
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.is_closed() || self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let link = Arc::downgrade(self);
        let mut backoff = Backoff::new(self.config.backoff.clone());

        tokio::spawn(async move {
            loop {
                let Some(delay) = backoff.next_delay() else {
                    warn!(
                        "Giving up reconnecting to Cinema 4D after {} attempts; the next command will retry",
                        backoff.attempt()
                    );
                    break;
                };
                debug!("Reconnecting to Cinema 4D in {:?}", delay);
                tokio::time::sleep(delay).await;

                let Some(inner) = link.upgrade() else {
                    return;
                };
                if inner.is_closed() || *inner.state.borrow() == ConnectionState::Ready {
                    break;
                }
                match inner.connect_once(false).await {
                    Ok(()) => {
                        info!("Reconnected to Cinema 4D after {} attempts", backoff.attempt());
                        break;
                    }
                    Err(e) => warn!("Reconnect attempt {} failed: {}", backoff.attempt(), e),
                }
            }

            if let Some(inner) = link.upgrade() {
                inner.reconnecting.store(false, Ordering::SeqCst);
                // Wake queued callers so they re-evaluate
                inner.state.send_modify(|_| {});
            }
        });
    }

    /// Route a response to its waiter
    fn deliver(&self, response: ApplicationResponse) {
        match response.tag {
            Some(tag) => {
                if lock(&self.pending).complete(tag, response) {
                    debug!(tag, "[C4D→Bridge] response delivered");
                } else {
                    warn!(tag, "Dropping response with no pending request (late or duplicate)");
                }
            }
            None => warn!("Dropping response without request_id: {:?}", response.outcome),
        }
    }
}

impl Drop for LinkInner {
    fn drop(&mut self) {
        if let Some(conn) = lock(&self.connection).take() {
            conn.reader.abort();
            conn.writer.abort();
        }
    }
}

async fn read_loop(link: Weak<LinkInner>, mut reader: Box<dyn AsyncReader>, epoch: u64) {
    let reason = loop {
        match reader.read_response().await {
            Ok(response) => {
                let Some(inner) = link.upgrade() else {
                    return;
                };
                inner.deliver(response);
            }
            Err(e) => break e,
        }
    };

    if let Some(inner) = link.upgrade() {
        inner.connection_lost(epoch, reason);
    }
}

async fn write_loop(
    link: Weak<LinkInner>,
    mut writer: Box<dyn AsyncWriter>,
    mut outbound: mpsc::Receiver<Outbound>,
    epoch: u64,
) {
    while let Some(Outbound { tag, data }) = outbound.recv().await {
        if let Err(e) = writer.write_frame(&data).await {
            error!(epoch, tag, "Failed to write frame: {}", e);
            if let Some(inner) = link.upgrade() {
                inner.connection_lost(epoch, e);
            }
            return;
        }
    }

    // Every sender is gone: the link is closing
    if let Err(e) = writer.shutdown().await {
        debug!(epoch, "Socket shutdown failed: {}", e);
    }
}

/// Resets the state to Disconnected if a connection attempt is abandoned
struct StateReset<'a> {
    link: &'a LinkInner,
    armed: bool,
}

impl Drop for StateReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.link.set_state(ConnectionState::Disconnected);
        }
    }
}

/// One place in the reconnect waiting line
struct QueueSlot<'a> {
    link: &'a LinkInner,
}

impl<'a> QueueSlot<'a> {
    fn acquire(link: &'a LinkInner, max_pending: usize) -> Option<Self> {
        link.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_pending).then_some(n + 1)
            })
            .ok()
            .map(|_| Self { link })
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.link.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lock a std mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
