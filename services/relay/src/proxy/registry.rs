//! Identity-indexed session registry.
//!
//! The transport keeps long-idle sessions alive indefinitely, so the only
//! reliable signal that a session went stale is the same identity arriving
//! again. The registry enforces at most one live session per identity:
//! registering over an existing entry returns the displaced handle for the
//! caller to close.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Non-owning reference to a live session.
///
/// The relay task owns the session's connections; the handle carries the
/// session's cancellation token, so closing a handle asks the owner to run
/// its own teardown rather than closing sockets out from under it.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    cancel: CancellationToken,
    created_at: Instant,
    peer_addr: SocketAddr,
}

impl SessionHandle {
    /// Create a handle with a fresh session id.
    pub fn new(cancel: CancellationToken, peer_addr: SocketAddr) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            cancel,
            created_at: Instant::now(),
            peer_addr,
        }
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the session was registered.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Remote address of the session's client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Force the session closed.
    ///
    /// Cancels the session's token; its relay tears down both connections.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Mapping from identity to the currently active session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Vec<u8>, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, displacing any existing one for the identity.
    ///
    /// Returns the displaced handle; the caller must close it.
    pub async fn register(
        &self,
        identity: Vec<u8>,
        handle: SessionHandle,
    ) -> Option<SessionHandle> {
        self.sessions.lock().await.insert(identity, handle)
    }

    /// Remove the entry for `identity` only if it still refers to
    /// `session_id`.
    ///
    /// The guard keeps an evicted session's deferred cleanup from removing
    /// the entry of the session that displaced it.
    pub async fn remove(&self, identity: &[u8], session_id: u64) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(identity)
            .is_some_and(|handle| handle.id() == session_id)
        {
            sessions.remove(identity);
            true
        } else {
            false
        }
    }

    /// Session id currently registered for an identity.
    pub async fn current_id(&self, identity: &[u8]) -> Option<u64> {
        self.sessions
            .lock()
            .await
            .get(identity)
            .map(SessionHandle::id)
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Check if the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SessionHandle {
        SessionHandle::new(CancellationToken::new(), "127.0.0.1:5000".parse().unwrap())
    }

    #[tokio::test]
    async fn test_register_displaces_previous() {
        let registry = SessionRegistry::new();

        assert!(registry.register(b"client-A".to_vec(), handle()).await.is_none());

        let second = handle();
        let second_id = second.id();
        let displaced = registry.register(b"client-A".to_vec(), second).await;
        assert!(displaced.is_some());

        assert_eq!(registry.current_id(b"client-A").await, Some(second_id));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_only_most_recent_survives_repeated_registration() {
        let registry = SessionRegistry::new();

        let mut displaced_ids = Vec::new();
        let mut last_id = 0;
        for _ in 0..5 {
            let next = handle();
            last_id = next.id();
            if let Some(old) = registry.register(b"client-A".to_vec(), next).await {
                old.close();
                displaced_ids.push(old.id());
            }
        }

        assert_eq!(displaced_ids.len(), 4);
        assert_eq!(registry.current_id(b"client-A").await, Some(last_id));
    }

    #[tokio::test]
    async fn test_remove_is_id_guarded() {
        let registry = SessionRegistry::new();

        let first = handle();
        let first_id = first.id();
        registry.register(b"client-A".to_vec(), first).await;

        let second = handle();
        let second_id = second.id();
        registry.register(b"client-A".to_vec(), second).await;

        // The stale session's deferred cleanup must not unregister the
        // newer session.
        assert!(!registry.remove(b"client-A", first_id).await);
        assert_eq!(registry.current_id(b"client-A").await, Some(second_id));

        assert!(registry.remove(b"client-A", second_id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let registry = SessionRegistry::new();

        registry.register(b"client-A".to_vec(), handle()).await;
        registry.register(b"client-B".to_vec(), handle()).await;
        assert_eq!(registry.len().await, 2);
    }

    #[test]
    fn test_close_cancels_token() {
        let token = CancellationToken::new();
        let handle = SessionHandle::new(token.clone(), "127.0.0.1:5000".parse().unwrap());

        assert!(!token.is_cancelled());
        handle.close();
        assert!(token.is_cancelled());
    }
}
