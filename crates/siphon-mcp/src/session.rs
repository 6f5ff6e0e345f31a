//! Session management. Each SSE connection gets its own session.
//!
//! A session lives exactly as long as its event stream. Ids are random
//! v4 UUIDs and are never handed out twice.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tracing::{debug, info};

use crate::handshake::{Handshake, HandshakeState};
use crate::transport::SessionTransport;

/// Maximum number of concurrent sessions
pub const MAX_SESSIONS: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Maximum number of sessions reached")]
    Full,
}

/// One client's logical connection
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    transport: SessionTransport,
    credential: Option<String>,
    handshake: Handshake,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("state", &self.handshake.state())
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Push channel to the client
    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    /// Billing credential presented when the stream was opened
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }
}

/// Manages all live sessions
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    /// Slots reserved against `max_sessions`, taken before insert
    reserved: AtomicUsize,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_max_sessions(MAX_SESSIONS)
    }

    pub fn with_max_sessions(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
            max_sessions,
        }
    }

    /// Allocate a session with a fresh id in the `uninitialized` state
    pub fn create(
        &self,
        transport: SessionTransport,
        credential: Option<String>,
    ) -> Result<Arc<Session>, SessionError> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_sessions).then_some(n + 1)
            })
            .map_err(|_| SessionError::Full)?;

        loop {
            let id = uuid::Uuid::new_v4().to_string();
            match self.sessions.entry(id) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let session = Arc::new(Session {
                        id: slot.key().clone(),
                        created_at: Utc::now(),
                        transport,
                        credential,
                        handshake: Handshake::new(),
                    });
                    slot.insert(session.clone());
                    info!("Created session {}", session.id);
                    return Ok(session);
                }
            }
        }
    }

    /// Get a live session by id
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a session. Returns whether it was present; deleting twice is fine.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
            debug!("Deleted session {}", id);
        }
        removed
    }

    /// Drop every session, ending their event streams
    pub fn clear(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let count = ids.iter().filter(|id| self.delete(id)).count();
        info!("Closed {} sessions", count);
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn transport() -> SessionTransport {
        SessionTransport::channel().0
    }

    #[test]
    fn test_create_session() {
        let store = SessionStore::new();
        let session = store.create(transport(), None).unwrap();
        assert_eq!(session.state(), HandshakeState::Uninitialized);
        assert_eq!(store.count(), 1);
        assert!(uuid::Uuid::parse_str(session.id()).is_ok());
    }

    #[test]
    fn test_get_session() {
        let store = SessionStore::new();
        let session = store.create(transport(), Some("key".into())).unwrap();
        let found = store.get(session.id()).unwrap();
        assert_eq!(found.credential(), Some("key"));
        assert!(store.get("nonexistent").is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = SessionStore::new();
        let session = store.create(transport(), None).unwrap();
        assert!(store.delete(session.id()));
        assert!(!store.delete(session.id()));
        assert!(store.get(session.id()).is_none());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_ids_unique() {
        let store = SessionStore::new();
        let ids: HashSet<String> = (0..200)
            .map(|_| store.create(transport(), None).unwrap().id().to_string())
            .collect();
        assert_eq!(ids.len(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creation() {
        let store = Arc::new(SessionStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                (0..50)
                    .map(|_| store.create(transport(), None).unwrap().id().to_string())
                    .collect::<Vec<_>>()
            }));
        }
        let mut ids = HashSet::new();
        for handle in handles {
            ids.extend(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 400);
        assert_eq!(store.count(), 400);
    }

    #[test]
    fn test_session_limit() {
        let store = SessionStore::with_max_sessions(2);
        store.create(transport(), None).unwrap();
        store.create(transport(), None).unwrap();
        assert_eq!(store.create(transport(), None).unwrap_err(), SessionError::Full);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_session_limit_under_contention() {
        let store = Arc::new(SessionStore::with_max_sessions(10));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                (0..50)
                    .filter(|_| store.create(transport(), None).is_ok())
                    .count()
            }));
        }
        let mut created = 0;
        for handle in handles {
            created += handle.await.unwrap();
        }
        assert_eq!(created, 10);
        assert_eq!(store.count(), 10);
    }

    #[test]
    fn test_delete_frees_slot() {
        let store = SessionStore::with_max_sessions(1);
        let session = store.create(transport(), None).unwrap();
        assert_eq!(store.create(transport(), None).unwrap_err(), SessionError::Full);
        store.delete(session.id());
        store.delete(session.id());
        assert!(store.create(transport(), None).is_ok());
        assert_eq!(store.create(transport(), None).unwrap_err(), SessionError::Full);

        store.clear();
        assert!(store.create(transport(), None).is_ok());
    }

    #[test]
    fn test_debug_redacts_credential() {
        let store = SessionStore::new();
        let session = store.create(transport(), Some("sk-secret".into())).unwrap();
        let debug = format!("{:?}", session);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_clear() {
        let store = SessionStore::new();
        store.create(transport(), None).unwrap();
        store.create(transport(), None).unwrap();
        store.clear();
        assert_eq!(store.count(), 0);
    }
}
