//! Stream endpoint authentication
//!
//! Self-hosted deployments share one bearer token. Metered deployments
//! treat the bearer value as the caller's billing credential and verify it
//! with one billing round trip before the stream opens.

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::billing::{AUTH_CHECK_LABEL, BillingGate};

pub enum StreamAuth {
    /// Shared secret compared against the bearer token
    Token(String),
    /// Bearer value is a billing credential
    Metered(Arc<dyn BillingGate>),
}

impl std::fmt::Debug for StreamAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("StreamAuth::Token([REDACTED])"),
            Self::Metered(_) => f.write_str("StreamAuth::Metered"),
        }
    }
}

/// Why a stream request was turned away
#[derive(Debug, Clone, PartialEq)]
pub enum AuthRejection {
    MissingBearer,
    InvalidToken,
    MissingCredential,
    Forbidden { status: u16, details: Value },
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::MissingBearer => {
                (StatusCode::UNAUTHORIZED, "Unauthorized: Missing Bearer token").into_response()
            }
            Self::InvalidToken => (StatusCode::FORBIDDEN, "Forbidden: Invalid token").into_response(),
            Self::MissingCredential => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthorized: Missing bearer credential." })),
            )
                .into_response(),
            Self::Forbidden { status, details } => {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED);
                (status, Json(json!({ "error": "Forbidden", "details": details }))).into_response()
            }
        }
    }
}

/// Constant-time string comparison
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl StreamAuth {
    /// Check a stream request. On success returns the billing credential
    /// to bind to the new session, if the mode has one.
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<Option<String>, AuthRejection> {
        match self {
            Self::Token(expected) => {
                let token = bearer(headers).ok_or(AuthRejection::MissingBearer)?;
                if !safe_equal(token, expected) {
                    warn!("Stream rejected: invalid token");
                    return Err(AuthRejection::InvalidToken);
                }
                Ok(None)
            }
            Self::Metered(gate) => {
                let credential = bearer(headers).ok_or(AuthRejection::MissingCredential)?;
                let request_id = Value::String(uuid::Uuid::new_v4().to_string());
                match gate
                    .verify(Some(credential), AUTH_CHECK_LABEL, Some(&request_id))
                    .await
                {
                    Ok(receipt) => {
                        debug!(cost_info = %receipt.cost_info, "Stream credential verified");
                        Ok(Some(credential.to_string()))
                    }
                    Err(e) => {
                        warn!("Stream rejected by billing: {}", e);
                        Err(AuthRejection::Forbidden {
                            status: e.status(),
                            details: e.body(),
                        })
                    }
                }
            }
        }
    }
}
