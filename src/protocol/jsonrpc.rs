//! JSON-RPC 2.0 message types (spec §6.1), narrowed to what a single-
//! request-at-a-time stdio dispatcher needs: no batching, no streaming
//! extensions.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Zero-sized type that serializes to `"2.0"` and rejects any other value
/// on deserialize, so a malformed envelope fails at the type boundary
/// rather than deeper in the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid jsonrpc version: expected \"{JSONRPC_VERSION}\", got {version:?}"
            )))
        }
    }
}

/// A request or notification identifier. JSON-RPC 2.0 permits string,
/// number, or (for responses only) null; this server never emits a
/// fractional number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

/// An inbound message: a request expects exactly one response; a
/// notification (no `id` field) expects none (spec §4.8 Control flow).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcInbound {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<RequestId>,
}

impl JsonRpcInbound {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Either side of an outbound response, never both (spec §6.1.3).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcOutboundPayload {
    Success { result: Value },
    Error { error: JsonRpcError },
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcOutbound {
    pub jsonrpc: JsonRpcVersion,
    #[serde(flatten)]
    pub payload: JsonRpcOutboundPayload,
    pub id: Option<RequestId>,
}

impl JsonRpcOutbound {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcOutboundPayload::Success { result },
            id: Some(id),
        }
    }

    pub fn error(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            payload: JsonRpcOutboundPayload::Error { error },
            id,
        }
    }
}

/// Wire error object (spec §6.1.3). `data` is intentionally minimal: an
/// opaque correlation ID and, for scope violations, a machine-readable
/// `kind`. Never carries sensitive payload.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard and server-defined JSON-RPC error codes (spec §4.8 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ScopeViolation,
    AuthenticationError,
    NotFound,
    RateLimited,
    UpstreamUnavailable,
}

impl JsonRpcErrorCode {
    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ScopeViolation => -32000,
            Self::AuthenticationError => -32001,
            Self::NotFound => -32004,
            Self::RateLimited => -32005,
            Self::UpstreamUnavailable => -32006,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ScopeViolation => "ScopeViolation",
            Self::AuthenticationError => "Authentication failed",
            Self::NotFound => "Resource not found",
            Self::RateLimited => "Rate limited",
            Self::UpstreamUnavailable => "Upstream unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_rejects_anything_but_2_0() {
        let ok: Result<JsonRpcVersion, _> = serde_json::from_str("\"2.0\"");
        assert!(ok.is_ok());
        let bad: Result<JsonRpcVersion, _> = serde_json::from_str("\"1.0\"");
        assert!(bad.is_err());
    }

    #[test]
    fn notification_has_no_id() {
        let inbound: JsonRpcInbound =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(inbound.is_notification());
    }

    #[test]
    fn request_with_numeric_id_round_trips() {
        let inbound: JsonRpcInbound =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#).unwrap();
        assert_eq!(inbound.id, Some(RequestId::Number(1)));
    }

    #[test]
    fn error_code_table_matches_spec() {
        assert_eq!(JsonRpcErrorCode::ScopeViolation.code(), -32000);
        assert_eq!(JsonRpcErrorCode::AuthenticationError.code(), -32001);
        assert_eq!(JsonRpcErrorCode::NotFound.code(), -32004);
        assert_eq!(JsonRpcErrorCode::RateLimited.code(), -32005);
        assert_eq!(JsonRpcErrorCode::UpstreamUnavailable.code(), -32006);
    }
}
