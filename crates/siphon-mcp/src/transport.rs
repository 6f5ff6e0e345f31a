//! Per-session SSE push channel
//!
//! Each session owns the sending half of an unbounded channel; the
//! receiving half is the session's [`EventStream`]. The stream carries a
//! guard, so dropping it (client disconnect, write failure, shutdown)
//! cancels the session's timers and removes it from the store.

use axum::response::sse::Event;
use chrono::Utc;
use futures_util::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::protocol::JsonRpcResponse;
use crate::session::{Session, SessionError, SessionStore};

/// Path clients POST RPC traffic to
pub const MESSAGE_PATH: &str = "/sse/message";
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
pub const ENDPOINT_DELAY: Duration = Duration::from_millis(10);

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Frame a payload: strings go out verbatim, anything else as JSON text
    pub fn new(event: Option<&str>, payload: &Value) -> Self {
        let data = match payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            event: event.map(str::to_string),
            data,
        }
    }

    pub fn endpoint(path: &str) -> Self {
        Self::new(Some("endpoint"), &Value::String(path.to_string()))
    }

    pub fn ping() -> Self {
        Self::new(Some("ping"), &Value::String("ping".to_string()))
    }

    pub fn to_event(&self) -> Event {
        let event = Event::default().data(&self.data);
        match &self.event {
            Some(name) => event.event(name),
            None => event,
        }
    }
}

/// Writable handle to a session's stream. Sending after the stream has
/// closed is a silent no-op.
#[derive(Debug, Clone)]
pub struct SessionTransport {
    tx: mpsc::UnboundedSender<SseFrame>,
}

impl SessionTransport {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SseFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a frame. Returns false when the stream is already gone.
    pub fn send(&self, frame: SseFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Push a JSON-RPC reply as a `message` event
    pub fn send_response(&self, response: &JsonRpcResponse) -> bool {
        match serde_json::to_string(response) {
            Ok(data) => self.send(SseFrame {
                event: Some("message".to_string()),
                data,
            }),
            Err(e) => {
                warn!("Failed to serialize response: {}", e);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Stream timing and routing
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub message_path: String,
    pub endpoint_delay: Duration,
    pub heartbeat: Duration,
    /// Cancelled on server shutdown; every session's timers hang off it
    pub shutdown: CancellationToken,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            message_path: MESSAGE_PATH.to_string(),
            endpoint_delay: ENDPOINT_DELAY,
            heartbeat: HEARTBEAT_INTERVAL,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Releases a session when its stream goes away
struct SessionGuard {
    store: Arc<SessionStore>,
    session_id: String,
    opened_at: chrono::DateTime<Utc>,
    cancel: CancellationToken,
    timers: TaskTracker,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.store.delete(&self.session_id);
        let age = Utc::now() - self.opened_at;
        info!(
            session_id = %self.session_id,
            age_secs = age.num_seconds(),
            "Client disconnected"
        );
    }
}

/// Outbound events of one session, in send order
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SseFrame>,
    guard: SessionGuard,
}

impl EventStream {
    pub fn session_id(&self) -> &str {
        &self.guard.session_id
    }

    /// The endpoint and heartbeat tasks; `wait()` resolves once both ended
    pub fn timers(&self) -> TaskTracker {
        self.guard.timers.clone()
    }
}

impl Stream for EventStream {
    type Item = SseFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SseFrame>> {
        self.rx.poll_recv(cx)
    }
}

/// Open a session: register it, schedule the `endpoint` event and start
/// the heartbeat. The session ends when the returned stream is dropped.
pub fn connect(
    store: Arc<SessionStore>,
    credential: Option<String>,
    options: &StreamOptions,
) -> Result<(Arc<Session>, EventStream), SessionError> {
    let (transport, rx) = SessionTransport::channel();
    let session = store.create(transport, credential)?;
    let cancel = options.shutdown.child_token();

    let timers = TaskTracker::new();

    let endpoint = format!("{}?sessionId={}", options.message_path, session.id());
    spawn_endpoint(&timers, &session, endpoint, options.endpoint_delay, cancel.clone());
    spawn_heartbeat(&timers, &session, options.heartbeat, cancel.clone());
    timers.close();

    let guard = SessionGuard {
        store,
        session_id: session.id().to_string(),
        opened_at: session.created_at(),
        cancel,
        timers,
    };
    Ok((session, EventStream { rx, guard }))
}

fn spawn_endpoint(
    timers: &TaskTracker,
    session: &Session,
    path: String,
    delay: Duration,
    cancel: CancellationToken,
) {
    let transport = session.transport().clone();
    let session_id = session.id().to_string();
    timers.spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                info!(session_id = %session_id, "Sending endpoint event");
                transport.send(SseFrame::endpoint(&path));
            }
        }
    });
}

fn spawn_heartbeat(
    timers: &TaskTracker,
    session: &Session,
    period: Duration,
    cancel: CancellationToken,
) {
    let transport = session.transport().clone();
    let session_id = session.id().to_string();
    timers.spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !transport.send(SseFrame::ping()) {
                        break;
                    }
                }
            }
        }
        debug!(session_id = %session_id, "Heartbeat stopped");
    });
}
