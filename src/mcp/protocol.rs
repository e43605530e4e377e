//! JSON-RPC 2.0 protocol implementation
//!
//! Defines the envelope types for MCP communication over stdio and the
//! classification of inbound frames into requests, notifications, client
//! responses and invalid messages.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request identifier, echoed verbatim in the response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,

    /// Result (present if successful; may be `null`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error (present if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,

    /// Request ID (echoed from request)
    pub id: Option<RequestId>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id: Some(id),
        }
    }

    /// Create an error response
    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id: Some(id),
        }
    }
}

/// Server-initiated notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// The `initialized` notification sent after every `initialize` reply
    pub fn initialized() -> Self {
        Self::new("initialized", Value::Object(Map::new()))
    }
}

/// Anything the server writes to its output
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl From<JsonRpcResponse> for OutgoingMessage {
    fn from(response: JsonRpcResponse) -> Self {
        OutgoingMessage::Response(response)
    }
}

impl From<JsonRpcNotification> for OutgoingMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        OutgoingMessage::Notification(notification)
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,

    /// Error message
    pub message: String,

    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;
    pub const TOOL_FAILED: i32 = -32000;

    /// Parse error (-32700)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::application_error(Self::PARSE_ERROR, message)
    }

    /// Invalid request (-32600)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::application_error(Self::INVALID_REQUEST, message)
    }

    /// Method not found (-32601)
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::application_error(
            Self::METHOD_NOT_FOUND,
            format!("Method not found: {}", method.into()),
        )
    }

    /// Invalid params (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::application_error(Self::INVALID_PARAMS, message)
    }

    /// Internal error (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::application_error(Self::INTERNAL_ERROR, message)
    }

    /// Request arrived before the handshake (-32002)
    pub fn not_initialized() -> Self {
        Self::application_error(Self::SERVER_NOT_INITIALIZED, "Server not initialized")
    }

    /// Request arrived after `shutdown` (-32600)
    pub fn shutting_down() -> Self {
        Self::invalid_request("Server is shutting down")
    }

    /// Tool execution failure (-32000)
    pub fn tool_failed(tool: &str, cause: impl std::fmt::Display) -> Self {
        Self::application_error(Self::TOOL_FAILED, format!("Tool '{}' failed: {}", tool, cause))
    }

    /// Application error (custom code)
    pub fn application_error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// An inbound frame after classification
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// `method` with `id`: exactly one response is owed
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// `method` without `id`: never answered
    Notification { method: String, params: Value },
    /// `id` without `method`: a reply from the client, ignored
    ClientResponse { id: RequestId },
    /// Valid JSON that is not a usable envelope
    Invalid {
        id: Option<RequestId>,
        reason: String,
    },
}

/// A frame that was not valid JSON
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    /// Identifier recovered from the raw text, if any
    pub id: Option<RequestId>,
    pub message: String,
}

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""id"\s*:\s*(-?\d+|"(?:[^"\\]|\\.)*")"#).expect("valid id pattern")
});

/// Best-effort recovery of a request id from a frame that failed to parse
///
/// Only an `"id"` key of the outermost object counts; ids nested in `params`
/// or quoted inside string values are ignored.
pub fn salvage_id(raw: &str) -> Option<RequestId> {
    ID_PATTERN
        .captures_iter(raw)
        .filter(|captures| captures.get(0).map(|m| depth_at(raw, m.start())) == Some(Some(1)))
        .find_map(|captures| serde_json::from_str(captures.get(1)?.as_str()).ok())
}

/// Nesting depth at `offset`, or `None` when `offset` falls inside a string literal
fn depth_at(raw: &str, offset: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &byte in &raw.as_bytes()[..offset] {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    (!in_string).then_some(depth)
}

/// Parse and classify one frame
pub fn classify(frame: &str) -> std::result::Result<IncomingMessage, ParseFailure> {
    match serde_json::from_str::<Value>(frame) {
        Ok(value) => Ok(classify_value(value)),
        Err(e) => Err(ParseFailure {
            id: salvage_id(frame),
            message: format!("Parse error: {}", e),
        }),
    }
}

/// Classify an already-parsed JSON value
pub fn classify_value(value: Value) -> IncomingMessage {
    let mut object = match value {
        Value::Object(object) => object,
        _ => {
            return IncomingMessage::Invalid {
                id: None,
                reason: "message must be a JSON object".to_string(),
            }
        }
    };

    let id = match object.remove("id") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<RequestId>(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                return IncomingMessage::Invalid {
                    id: None,
                    reason: "id must be a number or a string".to_string(),
                }
            }
        },
    };

    match object.get("jsonrpc") {
        None => {}
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        Some(_) => {
            return IncomingMessage::Invalid {
                id,
                reason: "jsonrpc must be '2.0'".to_string(),
            }
        }
    }

    let params = object.remove("params").unwrap_or(Value::Null);

    match (object.remove("method"), id) {
        (Some(Value::String(method)), Some(id)) => IncomingMessage::Request { id, method, params },
        (Some(Value::String(method)), None) => IncomingMessage::Notification { method, params },
        (Some(_), id) => IncomingMessage::Invalid {
            id,
            reason: "method must be a string".to_string(),
        },
        (None, Some(id)) => IncomingMessage::ClientResponse { id },
        (None, None) => IncomingMessage::Invalid {
            id: None,
            reason: "message has neither method nor id".to_string(),
        },
    }
}
