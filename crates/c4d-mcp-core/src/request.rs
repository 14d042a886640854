//! Tool call data model shared by every transport

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered mapping of argument name to value
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// Client-facing transport flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Newline-delimited JSON-RPC over stdin/stdout
    #[default]
    Stdio,
    /// GET event stream paired with a POST message endpoint
    Sse,
    /// POST-only HTTP, stateful or stateless
    StreamableHttp,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            "streamable-http" => Ok(TransportKind::StreamableHttp),
            other => Err(format!(
                "unknown transport '{}' (expected stdio, sse or streamable-http)",
                other
            )),
        }
    }
}

/// Where a tool call came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOrigin {
    pub transport: TransportKind,
    /// Transport session, if the transport has sessions
    pub session: Option<String>,
}

impl CallOrigin {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            session: None,
        }
    }

    pub fn with_session(transport: TransportKind, session: impl Into<String>) -> Self {
        Self {
            transport,
            session: Some(session.into()),
        }
    }
}

impl fmt::Display for CallOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Some(session) => write!(f, "{}/{}", self.transport, session),
            None => write!(f, "{}", self.transport),
        }
    }
}

/// A client-issued request to run one named application command
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Caller-scoped request id (the JSON-RPC id, rendered as a string)
    pub id: String,
    /// Command identifier
    pub name: String,
    /// Command arguments, in the order the client sent them
    pub arguments: Arguments,
    pub origin: CallOrigin,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Arguments,
        origin: CallOrigin,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            origin,
        }
    }
}

/// Successful result of a tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Payload returned by Cinema 4D
    pub payload: serde_json::Value,
}

impl ToolResult {
    pub fn new(payload: serde_json::Value) -> Self {
        Self { payload }
    }
}
