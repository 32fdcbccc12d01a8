use crate::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Tracks the connected sessions of a server
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<u64, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        debug!("Registered session {}", session.id());
        sessions.insert(session.id(), session);
    }

    pub async fn remove(&self, session_id: u64) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&session_id);
        if removed.is_some() {
            debug!("Removed session {}", session_id);
        }
        removed
    }

    pub async fn get(&self, session_id: u64) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshot of the registered sessions
    pub async fn sessions(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Sends `text` to every connected session; returns how many accepted it
    pub async fn broadcast_text(&self, text: &str) -> usize {
        let mut delivered = 0;

        for session in self.sessions().await {
            match session.send_text(text).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Broadcast to session {} failed: {}", session.id(), e),
            }
        }

        delivered
    }

    /// Closes every registered session gracefully
    pub async fn close_all(&self) {
        for session in self.sessions().await {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::SessionHandler;
    use crate::state::Role;

    struct Noop;
    impl SessionHandler for Noop {}

    fn session() -> Session {
        Session::new(Role::Server, Arc::new(SessionConfig::default()), Arc::new(Noop))
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = SessionRegistry::new();
        let session = session();
        let id = session.id();

        assert!(registry.is_empty().await);

        registry.insert(session).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get(id).await.map(|s| s.id()), Some(id));

        assert!(registry.remove(id).await.is_some());
        assert!(registry.remove(id).await.is_none());
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_skips_unconnected() {
        let registry = SessionRegistry::new();
        registry.insert(session()).await;
        registry.insert(session()).await;

        assert_eq!(registry.broadcast_text("hi").await, 0);
    }
}
