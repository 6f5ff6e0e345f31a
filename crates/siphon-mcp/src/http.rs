//! HTTP surface: the SSE stream endpoint and the message submission endpoint

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::StreamAuth;
use crate::server::McpServer;
use crate::session::{SessionError, SessionStore};
use crate::transport::{self, StreamOptions};

/// Shared state behind both endpoints
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<StreamAuth>,
    pub stream: StreamOptions,
}

/// Build the router: `GET /sse` opens a stream, `POST <message path>`
/// submits RPC traffic for a session
pub fn router(state: AppState) -> Router {
    let message_path = state.stream.message_path.clone();
    Router::new()
        .route("/sse", get(open_stream))
        .route(&message_path, post(submit_message))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn open_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let credential = match state.auth.authorize(&headers).await {
        Ok(credential) => credential,
        Err(rejection) => return rejection.into_response(),
    };

    let (session, events) = match transport::connect(state.sessions.clone(), credential, &state.stream) {
        Ok(opened) => opened,
        Err(SessionError::Full) => {
            warn!("Stream refused: session limit reached");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": SessionError::Full.to_string() })),
            )
                .into_response();
        }
    };
    info!(session_id = %session.id(), "Client connected");

    let stream = stream::once(async { Ok::<_, Infallible>(Event::default().comment("ok")) })
        .chain(events.map(|frame| Ok(frame.to_event())));

    let mut response = Sse::new(stream).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
        .headers_mut()
        .insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn submit_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(session) = query
        .session_id
        .as_deref()
        .and_then(|id| state.sessions.get(id))
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Invalid or expired session ID" })),
        )
            .into_response();
    };

    state.server.handle_body(&session, &body).await;
    StatusCode::NO_CONTENT.into_response()
}
