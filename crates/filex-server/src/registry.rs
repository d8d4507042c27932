//! Per-connection sessions and the server-wide handle registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

/// Unique id of one accepted connection.
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Protocol state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined,
    Registered,
    Closed,
}

/// Server-side record of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    handle: Option<String>,
    address: SocketAddr,
    state: SessionState,
}

impl Session {
    /// Creates an unregistered session for a freshly accepted peer.
    pub fn new(address: SocketAddr) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            handle: None,
            address,
            state: SessionState::Unjoined,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The registered handle, if any. Once set it never changes.
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.handle.is_some()
    }

    /// Records the `/join` handshake. Has no effect after registration.
    pub fn mark_joined(&mut self) {
        if self.state == SessionState::Unjoined {
            self.state = SessionState::Joined;
        }
    }

    pub fn mark_closed(&mut self) {
        self.state = SessionState::Closed;
    }
}

/// Why a registration was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("handle already exists: {0}")]
    AlreadyExists(String),

    #[error("session already registered as {0}")]
    AlreadyRegistered(String),
}

/// Handle → session map shared by every connection task.
///
/// The map lives behind a single lock; callers only ever go through
/// these methods.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handle` to `session`.
    ///
    /// Fails if another live session owns the handle, or if `session`
    /// already has a handle of its own. On success the session moves to
    /// [`SessionState::Registered`].
    pub async fn register(&self, handle: &str, session: &mut Session) -> Result<(), RegistryError> {
        if let Some(existing) = session.handle() {
            return Err(RegistryError::AlreadyRegistered(existing.to_string()));
        }

        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(handle) {
            return Err(RegistryError::AlreadyExists(handle.to_string()));
        }

        session.handle = Some(handle.to_string());
        session.state = SessionState::Registered;
        sessions.insert(handle.to_string(), session.clone());
        Ok(())
    }

    /// Returns a snapshot of the session that owns `handle`.
    pub async fn lookup(&self, handle: &str) -> Option<Session> {
        self.sessions.lock().await.get(handle).cloned()
    }

    /// Removes the entry for `session`'s handle.
    ///
    /// The entry is only removed if it still belongs to this session.
    /// Returns `true` if something was removed.
    pub async fn unregister(&self, session: &Session) -> bool {
        let Some(handle) = session.handle() else {
            return false;
        };

        let mut sessions = self.sessions.lock().await;
        match sessions.get(handle) {
            Some(owner) if owner.id == session.id => {
                sessions.remove(handle);
                true
            }
            _ => false,
        }
    }

    /// Whether the session with `id` currently owns a handle.
    pub async fn is_registered(&self, id: SessionId) -> bool {
        self.sessions.lock().await.values().any(|s| s.id == id)
    }

    /// All registered handles, sorted.
    pub async fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        handles.sort();
        handles
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn new_session_is_unjoined() {
        let session = Session::new(peer(4000));
        assert_eq!(session.state(), SessionState::Unjoined);
        assert!(!session.is_registered());
        assert_eq!(session.address(), peer(4000));
    }

    #[test]
    fn session_ids_are_unique() {
        let a = Session::new(peer(1));
        let b = Session::new(peer(1));
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn register_binds_handle() {
        let registry = Registry::new();
        let mut session = Session::new(peer(4000));
        session.mark_joined();

        registry.register("alice", &mut session).await.unwrap();

        assert_eq!(session.handle(), Some("alice"));
        assert_eq!(session.state(), SessionState::Registered);
        assert!(registry.is_registered(session.id()).await);
        let found = registry.lookup("alice").await.unwrap();
        assert_eq!(found.id(), session.id());
        assert_eq!(found.address(), peer(4000));
    }

    #[tokio::test]
    async fn duplicate_handle_rejected() {
        let registry = Registry::new();
        let mut first = Session::new(peer(1));
        let mut second = Session::new(peer(2));

        registry.register("alice", &mut first).await.unwrap();
        let err = registry.register("alice", &mut second).await.unwrap_err();

        assert_eq!(err, RegistryError::AlreadyExists("alice".into()));
        assert!(!second.is_registered());
        assert!(!registry.is_registered(second.id()).await);
        assert_eq!(registry.lookup("alice").await.unwrap().id(), first.id());
    }

    #[tokio::test]
    async fn handle_is_immutable() {
        let registry = Registry::new();
        let mut session = Session::new(peer(1));

        registry.register("alice", &mut session).await.unwrap();
        let err = registry.register("bob", &mut session).await.unwrap_err();

        assert_eq!(err, RegistryError::AlreadyRegistered("alice".into()));
        assert_eq!(session.handle(), Some("alice"));
        assert!(registry.lookup("bob").await.is_none());
    }

    #[tokio::test]
    async fn unregister_frees_handle() {
        let registry = Registry::new();
        let mut first = Session::new(peer(1));
        registry.register("alice", &mut first).await.unwrap();

        assert!(registry.unregister(&first).await);
        assert!(registry.is_empty().await);

        let mut second = Session::new(peer(2));
        registry.register("alice", &mut second).await.unwrap();
        assert_eq!(registry.lookup("alice").await.unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn unregister_ignores_foreign_and_unregistered() {
        let registry = Registry::new();
        let mut owner = Session::new(peer(1));
        registry.register("alice", &mut owner).await.unwrap();

        // A different session that happens to carry the same handle string
        // must not evict the owner.
        let mut impostor = Session::new(peer(2));
        impostor.handle = Some("alice".into());
        assert!(!registry.unregister(&impostor).await);

        let unregistered = Session::new(peer(3));
        assert!(!registry.unregister(&unregistered).await);

        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn handles_are_sorted() {
        let registry = Registry::new();
        for (port, name) in [(1, "carol"), (2, "alice"), (3, "bob")] {
            let mut session = Session::new(peer(port));
            registry.register(name, &mut session).await.unwrap();
        }
        assert_eq!(registry.handles().await, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_single_winner() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        for port in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let mut session = Session::new(peer(5000 + port));
                registry.register("alice", &mut session).await.is_ok()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len().await, 1);
    }
}
