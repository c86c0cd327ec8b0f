//! JSON-RPC 2.0 types for MCP communication.

use crate::error::McpError;
use serde::{Deserialize, Serialize};

/// Identifier of a request that expects a reply.
pub type RequestId = u32;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Any message read from the server, before classification.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// A classified server-to-client message.
#[derive(Debug)]
pub enum InboundMessage {
    /// Reply to one of our requests. An `error` member wins over `result`;
    /// an `error` member that is not a valid error object is a
    /// [`McpError::Decode`] for that request.
    Response {
        id: RequestId,
        outcome: Result<serde_json::Value, McpError>,
    },
    /// `method` without `id`. Never answered.
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
    /// `method` with `id`: the server is asking us something.
    Request {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    /// A reply whose id is null or could never have been issued by us.
    Orphan {
        id: Option<serde_json::Value>,
        error: Option<JsonRpcError>,
    },
}

/// Parse one line from the server into an [`InboundMessage`].
///
/// Returns [`McpError::Decode`] if the line is not a JSON object shaped like
/// a JSON-RPC envelope.
pub fn parse_inbound(line: &str) -> Result<InboundMessage, McpError> {
    let raw: RawEnvelope = serde_json::from_str(line)
        .map_err(|e| McpError::Decode(format!("invalid JSON-RPC message: {e}")))?;

    if let Some(method) = raw.method {
        return Ok(match raw.id {
            None => InboundMessage::Notification {
                method,
                params: raw.params,
            },
            Some(id) => InboundMessage::Request {
                id,
                method,
                params: raw.params,
            },
        });
    }

    let id = raw
        .id
        .as_ref()
        .and_then(serde_json::Value::as_u64)
        .and_then(|id| RequestId::try_from(id).ok());

    match id {
        Some(id) => {
            let outcome = match raw.error {
                Some(err) => Err(match serde_json::from_value::<JsonRpcError>(err) {
                    Ok(err) => err.into(),
                    Err(e) => McpError::Decode(format!("invalid error object in reply {id}: {e}")),
                }),
                None => Ok(raw.result.unwrap_or(serde_json::Value::Null)),
            };
            Ok(InboundMessage::Response { id, outcome })
        }
        None => Ok(InboundMessage::Orphan {
            id: raw.id,
            error: raw.error.and_then(|err| serde_json::from_value(err).ok()),
        }),
    }
}
