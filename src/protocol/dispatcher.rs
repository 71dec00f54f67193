//! The JSON-RPC request loop: read, parse, route, respond (spec §4.8).

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventKind, AuditHandle, AuditOutcome};
use crate::error::{CoreError, CoreResult};
use crate::protocol::framing::{self, FrameReader, FrameWriter};
use crate::protocol::jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcInbound, JsonRpcOutbound, RequestId,
};
use crate::resources::ResourceManager;

/// MCP protocol version this server declares support for.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "eln-mcp-bridge";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
struct ServerInfo {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ResourcesCapability {
    subscribe: bool,
    #[serde(rename = "listChanged")]
    list_changed: bool,
}

#[derive(Debug, Serialize)]
struct Capabilities {
    resources: ResourcesCapability,
}

#[derive(Debug, Serialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: &'static str,
    capabilities: Capabilities,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfo,
}

/// Routes JSON-RPC methods to `ResourceManager` operations and maps every
/// internal error to the wire error table in spec §4.8. Processes one
/// message at a time; retries and upstream concurrency live entirely inside
/// the components it calls, never here (spec §5.1).
pub struct ProtocolDispatcher {
    resources: Arc<ResourceManager>,
    audit: AuditHandle,
}

impl ProtocolDispatcher {
    pub fn new(resources: Arc<ResourceManager>, audit: AuditHandle) -> Self {
        Self { resources, audit }
    }

    /// Run the stdio loop until EOF, a shutdown notification, or a fatal
    /// internal error. `stop_accepting`, once notified, stops the loop from
    /// waiting on the next line; a request already being handled always
    /// runs to completion first (spec §5.4: new input stops, the in-flight
    /// request does not get cancelled mid-flight).
    pub async fn run<R: FrameReader, W: FrameWriter>(
        &self,
        mut reader: R,
        mut writer: W,
        stop_accepting: Arc<Notify>,
    ) -> CoreResult<()> {
        let mut buf = String::new();

        loop {
            let line = tokio::select! {
                biased;
                _ = stop_accepting.notified() => return Ok(()),
                frame = framing::read_frame(&mut reader, &mut buf) => frame,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(_) => {
                    let response = JsonRpcOutbound::error(
                        None,
                        wire_error(JsonRpcErrorCode::ParseError, &Uuid::new_v4().to_string(), None),
                    );
                    self.write_response(&mut writer, &response).await?;
                    continue;
                }
            };

            if let Some(response) = self.handle_line(&line).await {
                self.write_response(&mut writer, &response).await?;
            }
        }
    }

    async fn handle_line(&self, line: &str) -> Option<JsonRpcOutbound> {
        let corr_id = Uuid::new_v4().to_string();

        // Two distinct failure modes map to two distinct wire codes (spec
        // §4.8): a line that isn't even valid JSON is a ParseError; valid
        // JSON that doesn't satisfy the envelope schema (wrong jsonrpc
        // version, missing method, ...) is an InvalidRequest.
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(_) => {
                return Some(JsonRpcOutbound::error(
                    None,
                    wire_error(JsonRpcErrorCode::ParseError, &corr_id, None),
                ));
            }
        };

        let inbound: JsonRpcInbound = match serde_json::from_value(raw) {
            Ok(inbound) => inbound,
            Err(_) => {
                return Some(JsonRpcOutbound::error(
                    None,
                    wire_error(JsonRpcErrorCode::InvalidRequest, &corr_id, None),
                ));
            }
        };

        if inbound.is_notification() {
            // Notifications are accepted but never produce a response
            // (spec §4.8 Control flow); any processing side effect would
            // still need to run here, but none of this server's methods
            // are meaningful as notifications.
            return None;
        }

        let id = inbound.id.clone().expect("request id checked above");

        let result = self.dispatch(&inbound, &corr_id).await;
        Some(match result {
            Ok(value) => JsonRpcOutbound::success(id, value),
            Err(err) => JsonRpcOutbound::error(Some(id), self.map_error(&err, &corr_id)),
        })
    }

    async fn dispatch(&self, inbound: &JsonRpcInbound, corr_id: &str) -> CoreResult<Value> {
        match inbound.method.as_str() {
            "initialize" => Ok(serde_json::to_value(InitializeResult {
                protocol_version: PROTOCOL_VERSION,
                capabilities: Capabilities {
                    resources: ResourcesCapability {
                        subscribe: false,
                        list_changed: false,
                    },
                },
                server_info: ServerInfo {
                    name: SERVER_NAME,
                    version: SERVER_VERSION,
                },
            })
            .expect("InitializeResult always serializes")),

            "resources/list" => {
                let resources = self.resources.list_resources(corr_id).await?;
                Ok(json!({ "resources": resources, "nextCursor": Value::Null }))
            }

            "resources/read" => {
                let uri = inbound
                    .params
                    .as_ref()
                    .and_then(|p| p.get("uri"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| CoreError::InvalidParams("missing \"uri\" parameter".to_string()))?;
                let content = self.resources.read_resource(corr_id, uri).await?;
                Ok(json!({ "contents": [content] }))
            }

            other => Err(CoreError::MethodNotFound(other.to_string())),
        }
    }

    fn map_error(&self, err: &CoreError, corr_id: &str) -> JsonRpcError {
        let (code, kind) = match err {
            CoreError::InvalidParams(_) => (JsonRpcErrorCode::InvalidParams, None),
            CoreError::MethodNotFound(_) => (JsonRpcErrorCode::MethodNotFound, None),
            CoreError::ScopeViolation { kind, .. } => {
                (JsonRpcErrorCode::ScopeViolation, Some(kind.to_string()))
            }
            CoreError::Authentication(_) => (JsonRpcErrorCode::AuthenticationError, None),
            CoreError::NotFound(_) => (JsonRpcErrorCode::NotFound, None),
            CoreError::UpstreamRateLimited(_) => (JsonRpcErrorCode::RateLimited, None),
            CoreError::UpstreamUnavailable(_) => (JsonRpcErrorCode::UpstreamUnavailable, None),
            CoreError::Configuration(_)
            | CoreError::UpstreamPermanent(_)
            | CoreError::Internal(_)
            | CoreError::Io(_)
            | CoreError::Serialization(_) => (JsonRpcErrorCode::InternalError, None),
        };

        if !matches!(err, CoreError::ScopeViolation { .. }) {
            self.audit.emit(
                AuditEvent::new(corr_id, AuditEventKind::UpstreamError, AuditOutcome::Error)
                    .with_message(err.to_string()),
            );
        }

        wire_error(code, corr_id, kind)
    }

    async fn write_response<W: FrameWriter>(&self, writer: &mut W, response: &JsonRpcOutbound) -> CoreResult<()> {
        let line = serde_json::to_string(response)?;
        framing::write_frame(writer, &line).await
    }
}

fn wire_error(code: JsonRpcErrorCode, corr_id: &str, kind: Option<String>) -> JsonRpcError {
    let mut data = json!({ "correlation_id": corr_id });
    if let Some(kind) = kind {
        data["kind"] = Value::String(kind);
    }
    JsonRpcError {
        code: code.code(),
        message: code.message().to_string(),
        data: Some(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScopeViolationKind;

    #[test]
    fn scope_violation_wire_error_carries_kind() {
        let wire = wire_error(
            JsonRpcErrorCode::ScopeViolation,
            "corr-1",
            Some(ScopeViolationKind::NotebookOutsideConfiguredNotebook.to_string()),
        );
        assert_eq!(wire.code, -32000);
        assert_eq!(wire.message, "ScopeViolation");
        assert_eq!(
            wire.data.unwrap()["kind"],
            "NotebookOutsideConfiguredNotebook"
        );
    }

    #[test]
    fn error_code_mapping_matches_spec_table() {
        assert_eq!(JsonRpcErrorCode::InvalidParams.code(), -32602);
        assert_eq!(JsonRpcErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(JsonRpcErrorCode::AuthenticationError.code(), -32001);
    }

    #[test]
    fn wire_error_without_kind_omits_the_field() {
        let wire = wire_error(JsonRpcErrorCode::InternalError, "corr-2", None);
        assert!(wire.data.unwrap().get("kind").is_none());
    }

    #[test]
    fn malformed_json_is_distinguished_from_invalid_envelope() {
        let not_json = "{not json";
        assert!(serde_json::from_str::<Value>(not_json).is_err());

        let valid_json_bad_envelope: Value =
            serde_json::from_str(r#"{"jsonrpc":"1.0","method":"initialize"}"#).unwrap();
        assert!(serde_json::from_value::<JsonRpcInbound>(valid_json_bad_envelope).is_err());
    }
}
