//! Process-wide map of online users to their live connections

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::ConnectionHandle;

/// Single source of truth for "who is online".
///
/// At most one connection is authoritative per user. Created once at
/// startup, mutated only through the operations below, dropped at
/// shutdown.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<ConnectionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection as the authoritative session for its user.
    /// Returns the superseded handle, if any; the caller is responsible
    /// for closing it.
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        let previous = self.sessions.insert(handle.user_id.clone(), handle.clone());

        tracing::info!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            superseded = previous.is_some(),
            "Session registered"
        );

        previous
    }

    pub fn lookup(&self, user_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.sessions.get(user_id).map(|h| h.clone())
    }

    /// Remove the session only if `connection_id` still owns it, so a
    /// stale disconnect cannot evict a newer session for the same user.
    /// Returns true when the entry was removed.
    pub fn remove(&self, user_id: &str, connection_id: Uuid) -> bool {
        let removed = self
            .sessions
            .remove_if(user_id, |_, handle| handle.id == connection_id)
            .is_some();

        if removed {
            tracing::info!(
                connection_id = %connection_id,
                user_id = %user_id,
                "Session removed"
            );
        }

        removed
    }

    /// Current set of online user ids
    pub fn snapshot(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
