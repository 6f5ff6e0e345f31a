//! Per-message billing gate for metered hosting
//!
//! Every inbound message costs one verification round trip to the billing
//! service before it is routed. Charges are never batched or buffered.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::{JsonRpcRequest, methods};

/// Cost sent with every charge; the backend decides the real amount
pub const PLACEHOLDER_COST: u32 = 1;
/// Label of the verification done when a stream is opened
pub const AUTH_CHECK_LABEL: &str = "mcp-auth-check";

const FALLBACK_MESSAGE: &str = "Failed to process request due to billing.";
const UNREACHABLE_MESSAGE: &str = "Could not connect to the charging service.";

/// Opaque cost information returned by a successful charge
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeReceipt {
    pub cost_info: Value,
}

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing rejected '{operation}' with status {status}")]
    Rejected {
        operation: String,
        status: u16,
        body: Value,
    },
    #[error("billing service unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("no billing credential")]
    MissingCredential,
}

impl BillingError {
    /// HTTP status to report for this failure
    pub fn status(&self) -> u16 {
        match self {
            Self::Rejected { status, .. } => *status,
            Self::Unreachable(_) => 500,
            Self::MissingCredential => 401,
        }
    }

    /// Error body as the client should see it
    pub fn body(&self) -> Value {
        match self {
            Self::Rejected { body, .. } => body.clone(),
            Self::Unreachable(_) => json!({ "message": UNREACHABLE_MESSAGE }),
            Self::MissingCredential => json!({ "message": "Missing billing credential." }),
        }
    }

    /// `message` of the error body, or a generic fallback
    pub fn client_message(&self) -> String {
        self.body()
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or(FALLBACK_MESSAGE)
            .to_string()
    }
}

/// External verification/charge step
#[async_trait]
pub trait BillingGate: Send + Sync {
    async fn verify(
        &self,
        credential: Option<&str>,
        operation: &str,
        request_id: Option<&Value>,
    ) -> Result<ChargeReceipt, BillingError>;
}

/// Descriptive label charged for a message
pub fn operation_label(request: &JsonRpcRequest) -> String {
    match request.method.as_str() {
        methods::INITIALIZE => "mcp-initialize".to_string(),
        methods::INITIALIZED => "mcp-notifications-initialized".to_string(),
        methods::TOOLS_LIST => "mcp-tools-list".to_string(),
        methods::TOOLS_CALL => {
            format!("mcp-tool-call:{}", request.tool_name().unwrap_or_default())
        }
        other => unknown_method_label(other),
    }
}

/// Label for a method the dispatcher does not route, including entries
/// that are not valid JSON-RPC (`undefined` when there is no method)
pub fn unknown_method_label(method: &str) -> String {
    format!("mcp-method-unknown:{method}")
}

#[derive(Debug, Serialize)]
struct ChargeRequest<'a> {
    credit_cost: u32,
    tool_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a Value>,
}

/// Billing gate backed by the billing service's HTTP API
#[derive(Clone)]
pub struct HttpBillingGate {
    client: Client,
    url: String,
}

impl std::fmt::Debug for HttpBillingGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBillingGate").field("url", &self.url).finish()
    }
}

impl HttpBillingGate {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("siphon/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build billing HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl BillingGate for HttpBillingGate {
    async fn verify(
        &self,
        credential: Option<&str>,
        operation: &str,
        request_id: Option<&Value>,
    ) -> Result<ChargeReceipt, BillingError> {
        let credential = credential.ok_or(BillingError::MissingCredential)?;
        let body = ChargeRequest {
            credit_cost: PLACEHOLDER_COST,
            tool_name: operation,
            request_id,
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(operation, "Billing service unreachable: {}", e);
                BillingError::Unreachable(e)
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            warn!(operation, status = status.as_u16(), "Billing rejected request");
            return Err(BillingError::Rejected {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(operation, cost_info = %body, "Charged");
        Ok(ChargeReceipt { cost_info: body })
    }
}
