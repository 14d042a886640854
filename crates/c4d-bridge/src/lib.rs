//! Cinema 4D socket bridge
//!
//! This crate provides:
//! - Command codec for the plugin's JSON wire format (NDJSON or length-prefixed)
//! - Transport abstractions (AsyncReader/AsyncWriter/Connector traits)
//! - TCP transport
//! - The application link: one shared connection, tag correlation,
//!   reconnect with backoff

pub mod backoff;
pub mod config;
pub mod link;
mod pending;
pub mod protocol;
pub mod tcp;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use config::{AdmissionPolicy, LinkConfig};
pub use link::{AppLink, ConnectionState, PendingResponse};
pub use protocol::{ApplicationFrame, ApplicationResponse, CommandCodec, Framing, Outcome};
pub use tcp::{TcpConnector, probe};
pub use transport::{AsyncReader, AsyncWriter, Connector};
