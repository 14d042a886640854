//! Wire protocol for Rust <-> Cinema 4D communication
//!
//! Every frame carries one JSON object. Requests look like
//! `{"command": "add_primitive", "request_id": 7, "protocol_version": 1, ...arguments}`
//! with the tool arguments flattened next to the reserved members, in the
//! order the client supplied them. Responses echo `request_id` and carry
//! either an `error` member or the result members.
//!
//! Two framings are supported:
//! - `Ndjson`: payload followed by `\n` (the plugin's socket server default)
//! - `LengthPrefixed`: 4-byte little-endian length + payload

use bytes::{Buf, BufMut, Bytes, BytesMut};
use c4d_mcp_core::{Arguments, BridgeError, Result};
use serde_json::Value;
use std::str::FromStr;

/// Version stamped on every request frame
pub const PROTOCOL_VERSION: u64 = 1;

/// Largest frame accepted in either direction (64MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Error code used when Cinema 4D reports a failure without one
pub const UNSPECIFIED_ERROR_CODE: i32 = -1;

const COMMAND: &str = "command";
const REQUEST_ID: &str = "request_id";
const VERSION: &str = "protocol_version";
const ERROR: &str = "error";
const RESERVED: [&str; 3] = [COMMAND, REQUEST_ID, VERSION];

/// A command sent to Cinema 4D
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationFrame {
    /// Correlation tag, echoed back as `request_id`
    pub tag: u64,
    pub command: String,
    pub arguments: Arguments,
}

/// How a command ended on the Cinema 4D side
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure { code: i32, message: String },
}

/// A response read from Cinema 4D
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationResponse {
    /// `None` when the frame carried no usable `request_id`
    pub tag: Option<u64>,
    pub outcome: Outcome,
}

impl ApplicationResponse {
    pub fn success(tag: u64, payload: Value) -> Self {
        Self {
            tag: Some(tag),
            outcome: Outcome::Success(payload),
        }
    }

    pub fn failure(tag: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            tag: Some(tag),
            outcome: Outcome::Failure {
                code,
                message: message.into(),
            },
        }
    }

    /// Convert into the payload, or the application error Cinema 4D reported
    pub fn into_result(self) -> Result<Value> {
        match self.outcome {
            Outcome::Success(payload) => Ok(payload),
            Outcome::Failure { code, message } => Err(BridgeError::Application { code, message }),
        }
    }
}

/// Result of trying to pull one frame out of a receive buffer
#[derive(Debug, PartialEq)]
pub enum Decoded<T> {
    /// A complete frame; its bytes were consumed from the buffer
    Frame(T),
    /// Not enough bytes buffered yet
    Partial,
}

/// Frame delimiting scheme on the application socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    #[default]
    Ndjson,
    LengthPrefixed,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ndjson" | "newline" | "json-lines" => Ok(Framing::Ndjson),
            "length-prefixed" | "length" => Ok(Framing::LengthPrefixed),
            other => Err(format!("unknown framing '{}'", other)),
        }
    }
}

/// Stateless translator between frames and socket bytes
#[derive(Debug, Clone, Copy)]
pub struct CommandCodec {
    framing: Framing,
    max_frame_size: usize,
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new(Framing::default())
    }
}

impl CommandCodec {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Serialize a command into one framed request
    pub fn encode(&self, frame: &ApplicationFrame) -> Result<Bytes> {
        let mut object = serde_json::Map::with_capacity(frame.arguments.len() + RESERVED.len());
        object.insert(COMMAND.into(), Value::String(frame.command.clone()));
        object.insert(REQUEST_ID.into(), Value::from(frame.tag));
        object.insert(VERSION.into(), Value::from(PROTOCOL_VERSION));

        for (name, value) in &frame.arguments {
            if RESERVED.contains(&name.as_str()) {
                return Err(BridgeError::Encoding(format!(
                    "argument name '{}' is reserved by the Cinema 4D protocol",
                    name
                )));
            }
            object.insert(name.clone(), value.clone());
        }

        let payload = serde_json::to_vec(&Value::Object(object))?;
        self.frame(payload)
    }

    /// Pull one response out of `buf`
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Decoded<ApplicationResponse>> {
        self.decode_from(buf, &mut 0)
    }

    /// Like `decode`, resuming the line-terminator search at `*scanned`
    ///
    /// Callers that keep appending to the same buffer keep `scanned` between
    /// calls, so each byte is searched once however many reads a frame
    /// spans. It is reset to 0 whenever a frame is split off.
    pub fn decode_from(
        &self,
        buf: &mut BytesMut,
        scanned: &mut usize,
    ) -> Result<Decoded<ApplicationResponse>> {
        match self.split_frame(buf, scanned)? {
            Some(payload) => parse_response(&payload).map(Decoded::Frame),
            None => Ok(Decoded::Partial),
        }
    }

    /// Pull one request out of `buf` (the Cinema 4D side of the socket)
    pub fn decode_request(&self, buf: &mut BytesMut) -> Result<Decoded<ApplicationFrame>> {
        self.decode_request_from(buf, &mut 0)
    }

    pub fn decode_request_from(
        &self,
        buf: &mut BytesMut,
        scanned: &mut usize,
    ) -> Result<Decoded<ApplicationFrame>> {
        match self.split_frame(buf, scanned)? {
            Some(payload) => parse_request(&payload).map(Decoded::Frame),
            None => Ok(Decoded::Partial),
        }
    }

    /// Serialize a response (the Cinema 4D side of the socket)
    pub fn encode_response(&self, response: &ApplicationResponse) -> Result<Bytes> {
        let mut object = serde_json::Map::new();
        if let Some(tag) = response.tag {
            object.insert(REQUEST_ID.into(), Value::from(tag));
        }
        match &response.outcome {
            Outcome::Success(Value::Object(members)) => {
                for (name, value) in members {
                    object.insert(name.clone(), value.clone());
                }
            }
            Outcome::Success(other) => {
                object.insert("result".into(), other.clone());
            }
            Outcome::Failure { code, message } => {
                object.insert(
                    ERROR.into(),
                    serde_json::json!({ "code": code, "message": message }),
                );
            }
        }

        let payload = serde_json::to_vec(&Value::Object(object))?;
        self.frame(payload)
    }

    fn frame(&self, payload: Vec<u8>) -> Result<Bytes> {
        if payload.len() > self.max_frame_size {
            return Err(BridgeError::Encoding(format!(
                "frame of {} bytes exceeds maximum {}",
                payload.len(),
                self.max_frame_size
            )));
        }

        let mut out = BytesMut::with_capacity(payload.len() + 4);
        match self.framing {
            Framing::Ndjson => {
                out.put_slice(&payload);
                out.put_u8(b'\n');
            }
            Framing::LengthPrefixed => {
                out.put_u32_le(payload.len() as u32);
                out.put_slice(&payload);
            }
        }
        Ok(out.freeze())
    }

    /// Split the next complete payload off the front of `buf`
    ///
    /// Bytes before `*scanned` are known to hold no line terminator.
    fn split_frame(&self, buf: &mut BytesMut, scanned: &mut usize) -> Result<Option<BytesMut>> {
        match self.framing {
            Framing::Ndjson => loop {
                let start = (*scanned).min(buf.len());
                let Some(offset) = buf[start..].iter().position(|&b| b == b'\n') else {
                    *scanned = buf.len();
                    if buf.len() > self.max_frame_size {
                        return Err(BridgeError::Framing(format!(
                            "no line terminator within {} bytes",
                            self.max_frame_size
                        )));
                    }
                    return Ok(None);
                };

                let end = start + offset;
                *scanned = 0;
                let mut line = buf.split_to(end + 1);
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                // Blank lines are keep-alives
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                if line.len() > self.max_frame_size {
                    return Err(BridgeError::Framing(format!(
                        "line of {} bytes exceeds maximum {}",
                        line.len(),
                        self.max_frame_size
                    )));
                }
                return Ok(Some(line));
            },
            Framing::LengthPrefixed => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                if len == 0 {
                    return Err(BridgeError::Framing("zero-length frame".into()));
                }
                if len > self.max_frame_size {
                    return Err(BridgeError::Framing(format!(
                        "frame length {} exceeds maximum {}",
                        len, self.max_frame_size
                    )));
                }
                if buf.len() < 4 + len {
                    return Ok(None);
                }
                buf.advance(4);
                Ok(Some(buf.split_to(len)))
            }
        }
    }
}

fn parse_object(payload: &[u8]) -> Result<serde_json::Map<String, Value>> {
    match serde_json::from_slice(payload) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(BridgeError::Framing(format!(
            "expected a JSON object, got {}",
            preview(other.to_string().as_bytes())
        ))),
        Err(e) => Err(BridgeError::Framing(format!("invalid JSON payload: {}", e))),
    }
}

fn parse_tag(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_response(payload: &[u8]) -> Result<ApplicationResponse> {
    let mut tag = None;
    let mut error = None;
    let mut members = serde_json::Map::new();

    for (name, value) in parse_object(payload)? {
        match name.as_str() {
            REQUEST_ID => tag = parse_tag(&value),
            VERSION => {}
            ERROR => {
                if !value.is_null() {
                    error = Some(value);
                }
            }
            _ => {
                members.insert(name, value);
            }
        }
    }

    let outcome = match error {
        None => Outcome::Success(Value::Object(members)),
        Some(Value::Object(detail)) => Outcome::Failure {
            code: detail
                .get("code")
                .and_then(Value::as_i64)
                .map(|c| c as i32)
                .unwrap_or(UNSPECIFIED_ERROR_CODE),
            message: detail
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(detail.clone()).to_string()),
        },
        Some(Value::String(message)) => Outcome::Failure {
            code: members
                .get("code")
                .and_then(Value::as_i64)
                .map(|c| c as i32)
                .unwrap_or(UNSPECIFIED_ERROR_CODE),
            message,
        },
        Some(other) => Outcome::Failure {
            code: UNSPECIFIED_ERROR_CODE,
            message: other.to_string(),
        },
    };

    Ok(ApplicationResponse { tag, outcome })
}

fn parse_request(payload: &[u8]) -> Result<ApplicationFrame> {
    let mut command = None;
    let mut tag = None;
    let mut arguments = Arguments::new();

    for (name, value) in parse_object(payload)? {
        match name.as_str() {
            COMMAND => command = value.as_str().map(str::to_string),
            REQUEST_ID => tag = parse_tag(&value),
            VERSION => {
                if value.as_u64() != Some(PROTOCOL_VERSION) {
                    return Err(BridgeError::Framing(format!(
                        "unsupported protocol version {}",
                        value
                    )));
                }
            }
            _ => {
                arguments.insert(name, value);
            }
        }
    }

    Ok(ApplicationFrame {
        tag: tag.ok_or_else(|| BridgeError::Framing("request without request_id".into()))?,
        command: command.ok_or_else(|| BridgeError::Framing("request without command".into()))?,
        arguments,
    })
}

/// First 200 characters of a payload, for logs
pub fn preview(data: &[u8]) -> String {
    String::from_utf8_lossy(data).chars().take(200).collect()
}
