//! Session registry.
//!
//! Sessions are created at login, looked up per request by the cookie
//! value, and destroyed by expiry or explicit logout. They exist only
//! in process memory; the cookie value is an opaque random secret.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use kestrel_common::ids::{SessionSecret, UserId};
use kestrel_common::security::RoleName;
use kestrel_store::engine::AssetFilter;
use kestrel_store::engine::AssetKey;
use kestrel_store::pagination::KeysetSearch;

/// Cursor state of the session's current asset search.
pub struct AssetSearchState {
    pub search: KeysetSearch<AssetKey>,
    pub filter: AssetFilter,
}

/// One live session.
pub struct Session {
    pub secret: SessionSecret,
    pub user_id: UserId,
    pub roles: BTreeSet<RoleName>,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// The session's open search, if any. Search commands mutate the
    /// cursor across requests.
    pub search: Mutex<Option<AssetSearchState>>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Thread-safe registry keyed by the opaque secret.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    expiry: Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    /// `max_sessions == 0` means unlimited.
    pub fn new(expiry: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            expiry,
            max_sessions,
        }
    }

    /// Create a session for the user. Returns `None` at capacity.
    pub fn create(&self, user_id: UserId, roles: BTreeSet<RoleName>) -> Option<Arc<Session>> {
        if self.max_sessions != 0 && self.sessions.len() >= self.max_sessions {
            return None;
        }
        let now = Instant::now();
        let session = Arc::new(Session {
            secret: SessionSecret::generate(),
            user_id,
            roles,
            created_at: now,
            expires_at: now + self.expiry,
            search: Mutex::new(None),
        });
        self.sessions
            .insert(session.secret.as_str().to_string(), session.clone());
        kestrel_observability::record_active_sessions(self.sessions.len());
        Some(session)
    }

    /// Look up by cookie value. Expired sessions are evicted and treated
    /// as absent.
    pub fn find(&self, secret: &str) -> Option<Arc<Session>> {
        let session = self.sessions.get(secret)?.clone();
        if session.is_expired() {
            drop(self.sessions.remove(secret));
            return None;
        }
        Some(session)
    }

    /// Destroy a session (logout).
    pub fn remove(&self, secret: &str) {
        self.sessions.remove(secret);
        kestrel_observability::record_active_sessions(self.sessions.len());
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every expired session. Called opportunistically.
    pub fn purge_expired(&self) {
        self.sessions.retain(|_, s| !s.is_expired());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> BTreeSet<RoleName> {
        BTreeSet::from([RoleName::new("reader")])
    }

    #[test]
    fn test_create_and_find() {
        let registry = SessionRegistry::new(Duration::from_secs(60), 0);
        let session = registry.create(UserId::generate(), roles()).unwrap();
        let found = registry.find(session.secret.as_str()).unwrap();
        assert_eq!(found.user_id, session.user_id);
        assert!(registry.find("nonsense").is_none());
    }

    #[test]
    fn test_expired_session_evicted_on_lookup() {
        let registry = SessionRegistry::new(Duration::ZERO, 0);
        let session = registry.create(UserId::generate(), roles()).unwrap();
        assert!(registry.find(session.secret.as_str()).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let registry = SessionRegistry::new(Duration::from_secs(60), 2);
        assert!(registry.create(UserId::generate(), roles()).is_some());
        assert!(registry.create(UserId::generate(), roles()).is_some());
        assert!(registry.create(UserId::generate(), roles()).is_none());
    }

    #[test]
    fn test_remove() {
        let registry = SessionRegistry::new(Duration::from_secs(60), 0);
        let session = registry.create(UserId::generate(), roles()).unwrap();
        registry.remove(session.secret.as_str());
        assert!(registry.find(session.secret.as_str()).is_none());
    }

    #[test]
    fn test_purge_expired() {
        let registry = SessionRegistry::new(Duration::ZERO, 0);
        registry.create(UserId::generate(), roles());
        registry.create(UserId::generate(), roles());
        assert_eq!(registry.count(), 2);
        registry.purge_expired();
        assert_eq!(registry.count(), 0);
    }
}
