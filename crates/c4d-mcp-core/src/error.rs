//! Error types for the Cinema 4D bridge

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge error types
///
/// Connection-class failures (`Connect`, `ConnectionLost`, `NotConnected`,
/// `Busy`, `Shutdown`) are produced by the application link. Command-class
/// failures (`UnknownCommand`, `InvalidParams`, `Application`) are surfaced to
/// the caller untouched and never retried.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// A request could not be serialized into an application frame
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Malformed data on the application socket
    #[error("Framing error: {0}")]
    Framing(String),

    /// Could not open the application socket
    #[error("Connect error: {0}")]
    Connect(String),

    /// The application socket failed while the request was in flight
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The link is not ready and the admission policy rejects waiting
    #[error("Not connected to Cinema 4D")]
    NotConnected,

    /// Tool name is not in the catalogue
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Malformed tool call parameters
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Local deadline expired before the application answered
    #[error("Timed out after {}ms waiting for Cinema 4D", .0.as_millis())]
    Timeout(Duration),

    /// Cinema 4D reported a failure for the command
    #[error("Cinema 4D error {code}: {message}")]
    Application { code: i32, message: String },

    /// Too many requests are queued while the link is reconnecting
    #[error("Bridge busy: too many requests waiting for the Cinema 4D connection")]
    Busy,

    /// The link was closed
    #[error("Bridge is shutting down")]
    Shutdown,

    /// Local I/O failure outside the application socket
    #[error("I/O error: {0}")]
    Io(String),
}

/// Stable, transport-independent name of an error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    EncodingError,
    FramingError,
    ConnectError,
    ConnectionLost,
    NotConnected,
    UnknownCommand,
    InvalidParams,
    Timeout,
    ApplicationError,
    Busy,
    Shutdown,
    IoError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::EncodingError => "EncodingError",
            ErrorKind::FramingError => "FramingError",
            ErrorKind::ConnectError => "ConnectError",
            ErrorKind::ConnectionLost => "ConnectionLost",
            ErrorKind::NotConnected => "NotConnected",
            ErrorKind::UnknownCommand => "UnknownCommand",
            ErrorKind::InvalidParams => "InvalidParams",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ApplicationError => "ApplicationError",
            ErrorKind::Busy => "Busy",
            ErrorKind::Shutdown => "Shutdown",
            ErrorKind::IoError => "IoError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BridgeError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Encoding(_) => ErrorKind::EncodingError,
            BridgeError::Framing(_) => ErrorKind::FramingError,
            BridgeError::Connect(_) => ErrorKind::ConnectError,
            BridgeError::ConnectionLost(_) => ErrorKind::ConnectionLost,
            BridgeError::NotConnected => ErrorKind::NotConnected,
            BridgeError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            BridgeError::InvalidParams(_) => ErrorKind::InvalidParams,
            BridgeError::Timeout(_) => ErrorKind::Timeout,
            BridgeError::Application { .. } => ErrorKind::ApplicationError,
            BridgeError::Busy => ErrorKind::Busy,
            BridgeError::Shutdown => ErrorKind::Shutdown,
            BridgeError::Io(_) => ErrorKind::IoError,
        }
    }

    /// JSON-RPC error code used when this error reaches a client
    pub fn rpc_code(&self) -> i32 {
        match self {
            BridgeError::Encoding(_) => error_codes::ENCODING_ERROR,
            BridgeError::Framing(_) => error_codes::FRAMING_ERROR,
            BridgeError::Connect(_) => error_codes::CONNECT_ERROR,
            BridgeError::ConnectionLost(_) => error_codes::CONNECTION_LOST,
            BridgeError::NotConnected => error_codes::NOT_CONNECTED,
            BridgeError::UnknownCommand(_) => error_codes::UNKNOWN_COMMAND,
            BridgeError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            BridgeError::Timeout(_) => error_codes::TIMEOUT,
            BridgeError::Application { .. } => error_codes::APPLICATION_ERROR,
            BridgeError::Busy => error_codes::BUSY,
            BridgeError::Shutdown => error_codes::SHUTDOWN,
            BridgeError::Io(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// Whether the failure came from the connection rather than the command
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::Connect(_)
                | BridgeError::ConnectionLost(_)
                | BridgeError::NotConnected
                | BridgeError::Busy
                | BridgeError::Shutdown
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Encoding(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io(err.to_string())
    }
}

/// JSON-RPC error codes for the bridge
pub mod error_codes {
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;

    pub const UNKNOWN_COMMAND: i32 = -32000;
    pub const APPLICATION_ERROR: i32 = -32001;
    pub const TIMEOUT: i32 = -32002;
    pub const CONNECTION_LOST: i32 = -32003;
    pub const CONNECT_ERROR: i32 = -32004;
    pub const NOT_CONNECTED: i32 = -32005;
    pub const BUSY: i32 = -32006;
    pub const SHUTDOWN: i32 = -32007;
    pub const ENCODING_ERROR: i32 = -32008;
    pub const FRAMING_ERROR: i32 = -32009;
}
