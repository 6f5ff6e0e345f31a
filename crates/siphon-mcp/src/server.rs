//! MCP message dispatcher
//!
//! Takes the body of a submission, runs every message through the handshake
//! table and the billing gate, routes it, and pushes the reply onto the
//! session's stream. Nothing is ever returned in the submission response.

use serde::Serialize;
use serde_json::Value;
use siphon_core::{ToolError, ToolRegistry};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::billing::{BillingGate, operation_label, unknown_method_label};
use crate::handshake;
use crate::protocol::*;
use crate::session::Session;

/// Routes JSON-RPC traffic for every session
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    billing: Option<Arc<dyn BillingGate>>,
    server_info: ServerInfo,
}

impl McpServer {
    /// Create a dispatcher over a tool registry, billing disabled
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            billing: None,
            server_info: ServerInfo {
                name: "siphon".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Charge every inbound message through `gate` before routing it
    pub fn with_billing(mut self, gate: Arc<dyn BillingGate>) -> Self {
        self.billing = Some(gate);
        self
    }

    /// Handle a raw submission body. A body that is not JSON gets a parse
    /// error pushed with a null id.
    pub async fn handle_body(&self, session: &Session, body: &[u8]) {
        match serde_json::from_slice::<Value>(body) {
            Ok(payload) => self.handle_payload(session, payload).await,
            Err(e) => {
                warn!(session_id = %session.id(), "Unparseable submission: {}", e);
                session.transport().send_response(&JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        }
    }

    /// Handle one message or a batch. Batch entries run strictly in order,
    /// each to completion before the next starts.
    pub async fn handle_payload(&self, session: &Session, payload: Value) {
        match payload {
            Value::Array(batch) => {
                debug!(session_id = %session.id(), size = batch.len(), "Processing batch");
                for entry in batch {
                    self.handle_value(session, entry).await;
                }
            }
            single => self.handle_value(session, single).await,
        }
    }

    async fn handle_value(&self, session: &Session, value: Value) {
        let id = value.get("id").filter(|id| !id.is_null()).cloned();
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("undefined")
            .to_string();

        let e = match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => return self.handle_message(session, request).await,
            Err(e) => e,
        };
        warn!(session_id = %session.id(), "Invalid JSON-RPC message: {}", e);

        // malformed entries are charged like any other message
        if let Err(refusal) = self
            .charge(session, &unknown_method_label(&method), id.as_ref())
            .await
        {
            if id.is_some() {
                session.transport().send_response(&refusal);
            }
            return;
        }

        if let Some(id) = id {
            session.transport().send_response(&JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("Invalid Request: {e}"),
            ));
        }
    }

    /// Handle one message and push its reply, if any
    pub async fn handle_message(&self, session: &Session, request: JsonRpcRequest) {
        let span = info_span!(
            "rpc",
            session_id = %session.id(),
            method = %request.method,
            id = ?request.id,
        );
        if let Some(response) = self.process(session, request).instrument(span).await {
            session.transport().send_response(&response);
        }
    }

    async fn process(&self, session: &Session, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let before = session.state();
        let promotion = handshake::promotion(before, &request.method);

        if let Err(refusal) = self
            .charge(session, &operation_label(&request), request.id.as_ref())
            .await
        {
            return request.id.is_some().then_some(refusal);
        }

        if let Some(to) = promotion {
            warn!(from = %before, to = %to, "Handshake step skipped, promoting session");
            session.handshake().advance(to);
        }

        let response = self.route(&request).await;

        let current = session.state();
        if let Some(to) = handshake::completion(current, &request.method) {
            if session.handshake().advance(to) > current {
                info!(state = %to, "Handshake advanced");
            }
        }

        if request.is_notification() {
            if response.is_some() {
                debug!("Dropping reply to notification");
            }
            return None;
        }
        response
    }

    /// Run one charge through the billing gate, if any. A refusal comes
    /// back as the -32001 reply to send when the message has an id.
    async fn charge(
        &self,
        session: &Session,
        label: &str,
        id: Option<&Value>,
    ) -> Result<(), JsonRpcResponse> {
        let Some(gate) = &self.billing else {
            return Ok(());
        };
        match gate.verify(session.credential(), label, id).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(operation = %label, "Billing check failed: {}", e);
                let id = id.cloned().unwrap_or(Value::Null);
                Err(JsonRpcResponse::error(id, BILLING_ERROR, e.client_message()).with_data(e.body()))
            }
        }
    }

    async fn route(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            methods::INITIALIZE => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    server_info: self.server_info.clone(),
                    capabilities: ServerCapabilities {
                        tools: ToolsCapability {
                            list_changed: false,
                        },
                    },
                };
                Some(reply(id, result))
            }

            methods::INITIALIZED => {
                info!("Client acknowledged initialization");
                None
            }

            methods::TOOLS_LIST => Some(self.list_tools(id)),

            methods::TOOLS_CALL => Some(self.call_tool(id, &request.params).await),

            other => {
                warn!("Unknown method: {}", other);
                Some(JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                ))
            }
        }
    }

    fn list_tools(&self, id: Value) -> JsonRpcResponse {
        let tools: Vec<McpTool> = self
            .registry
            .list_tools()
            .into_iter()
            .map(McpTool::from)
            .collect();
        let count = tools.len();

        match serde_json::to_value(ToolsListResult { tools }) {
            Ok(result) => {
                info!(count, "Listed tools");
                JsonRpcResponse::success(id, result)
            }
            Err(e) => {
                error!("Failed to build tool list: {}", e);
                JsonRpcResponse::error(
                    id,
                    SERVER_ERROR,
                    "An error occurred while generating the tool list.",
                )
            }
        }
    }

    async fn call_tool(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let Some(name) = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
        else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing 'name' parameter");
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        match self.registry.execute(name, arguments).await {
            Ok(text) => {
                info!(tool = name, "Tool call succeeded");
                reply(id, ToolCallResult::text(text))
            }
            Err(e @ ToolError::NotFound(_)) => {
                warn!("{}", e);
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, e.to_string())
            }
            Err(e) => {
                error!(tool = name, "Tool execution error: {}", e);
                JsonRpcResponse::error(id, INVALID_PARAMS, format!("Tool execution error: {e}"))
            }
        }
    }
}

fn reply(id: Value, result: impl Serialize) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Failed to serialize result: {e}")),
    }
}
