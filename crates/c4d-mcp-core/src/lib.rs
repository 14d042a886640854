//! # c4d-mcp-core
//!
//! Core types for the Cinema 4D MCP bridge.
//!
//! This crate provides the foundational types shared by the bridge and the server:
//! - Error taxonomy and JSON-RPC error codes
//! - Tool call requests, results and their origin

pub mod error;
pub mod request;

pub use error::{BridgeError, ErrorKind, Result, error_codes};
pub use request::{Arguments, CallOrigin, ToolCallRequest, ToolResult, TransportKind};
