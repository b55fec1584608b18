//! Live session registry
//!
//! Concurrent map of every accepted session, used for reporting and for
//! dropping sessions whose handlers died.

use dashmap::DashMap;
use std::net::SocketAddr;

use crate::core_types::SessionId;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: Option<SocketAddr>,
    pub login: Option<String>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: SessionId, peer: Option<SocketAddr>) {
        self.sessions.insert(session, SessionInfo { peer, login: None });
        tracing::info!(session, peer = ?peer, live_sessions = self.sessions.len(), "Session added");
    }

    /// Remove a session. Returns false if it was already gone.
    pub fn remove(&self, session: SessionId) -> bool {
        let removed = self.sessions.remove(&session).is_some();
        if removed {
            tracing::info!(session, live_sessions = self.sessions.len(), "Session removed");
        }
        removed
    }

    /// Remember who logged in on a session
    pub fn set_login(&self, session: SessionId, login: &str) {
        if let Some(mut info) = self.sessions.get_mut(&session) {
            info.login = Some(login.to_string());
        }
    }

    pub fn get(&self, session: SessionId) -> Option<SessionInfo> {
        self.sessions.get(&session).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.sessions.contains_key(&session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Live session ids in ascending order
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove() {
        let registry = SessionRegistry::new();
        registry.add(10001, None);
        registry.add(10002, "127.0.0.1:5000".parse().ok());
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.sessions(), vec![10001, 10002]);

        assert!(registry.remove(10001));
        assert!(!registry.remove(10001));
        assert!(!registry.contains(10001));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_login_is_recorded() {
        let registry = SessionRegistry::new();
        registry.add(10001, None);
        registry.set_login(10001, "alice");
        registry.set_login(99999, "ghost");
        assert_eq!(registry.get(10001).and_then(|i| i.login), Some("alice".to_string()));
        assert!(registry.get(99999).is_none());
    }
}
