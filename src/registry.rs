//! Registry of live WebSocket sessions.
//!
//! Each upgraded connection holds a `SessionGuard` for its whole lifetime.
//! The slab key doubles as the session id in logs, and dropping the guard
//! frees the slot even if the session task panics.

use chrono::{DateTime, Utc};
use slab::Slab;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What the registry knows about one session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Remote address of the peer.
    pub peer: SocketAddr,
    /// Wall-clock time the upgrade completed.
    pub started_at: DateTime<Utc>,
}

/// Registry of active sessions using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct SessionRegistry {
    sessions: Mutex<Slab<SessionInfo>>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(Slab::with_capacity(max_sessions.min(1024))),
            max_sessions,
        }
    }

    /// Claim a slot for a new session.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> Option<SessionGuard> {
        let mut sessions = self.lock();
        if sessions.len() >= self.max_sessions {
            return None;
        }
        let id = sessions.insert(SessionInfo {
            peer,
            started_at: Utc::now(),
        });
        Some(SessionGuard {
            registry: Arc::clone(self),
            id,
        })
    }

    /// Look up a live session.
    pub fn get(&self, id: usize) -> Option<SessionInfo> {
        self.lock().get(id).cloned()
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of sessions allowed.
    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    fn remove(&self, id: usize) -> Option<SessionInfo> {
        let mut sessions = self.lock();
        if sessions.contains(id) {
            Some(sessions.remove(id))
        } else {
            None
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slab<SessionInfo>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a registry slot for as long as it lives.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: usize,
}

impl SessionGuard {
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_session_registry() {
        let registry = Arc::new(SessionRegistry::new(2));
        assert!(registry.is_empty());

        let g1 = registry.register(peer(1000)).unwrap();
        let g2 = registry.register(peer(1001)).unwrap();

        // At capacity
        assert!(registry.register(peer(1002)).is_none());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.capacity(), 2);
        assert_eq!(registry.get(g1.id()).unwrap().peer, peer(1000));
        assert_eq!(registry.get(g2.id()).unwrap().peer, peer(1001));

        let id1 = g1.id();
        drop(g1);
        assert!(registry.get(id1).is_none());
        assert_eq!(registry.len(), 1);

        // Freed slot is reusable
        let g3 = registry.register(peer(1003)).unwrap();
        assert_eq!(registry.len(), 2);
        drop((g2, g3));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let registry = Arc::new(SessionRegistry::new(1));
        let worker = Arc::clone(&registry);

        let result = std::thread::spawn(move || {
            let _guard = worker.register(peer(2000)).unwrap();
            panic!("session task died");
        })
        .join();

        assert!(result.is_err());
        assert!(registry.is_empty());
        assert!(registry.register(peer(2001)).is_some());
    }

    #[test]
    fn test_started_at_is_recent() {
        let registry = Arc::new(SessionRegistry::new(4));
        let before = Utc::now();
        let guard = registry.register(peer(3000)).unwrap();
        let info = registry.get(guard.id()).unwrap();
        assert!(info.started_at >= before);
        assert!(info.started_at <= Utc::now());
    }
}
