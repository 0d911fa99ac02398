//! The authoritative set of connected sessions.
//!
//! One mutex-guarded ordered map, keyed by session id. Fan-out never
//! iterates the map directly: it takes a [`Registry::snapshot`] and
//! delivers outside the lock, so a slow peer cannot stall admission or
//! removal. The lock is held only for map operations, never across an
//! await point or a transport write.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::session::{Session, SessionId};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// An id was admitted twice. Ids come from a monotonic counter, so
    /// this indicates a caller bug, not bad user input.
    #[error("session {0} is already registered")]
    DuplicateSession(SessionId),
}

/// A session is present here iff it is between admission and removal.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<BTreeMap<SessionId, Arc<Session>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an admitted session.
    pub fn add(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(&session.id()) {
            return Err(RegistryError::DuplicateSession(session.id()));
        }
        sessions.insert(session.id(), session);
        Ok(())
    }

    /// Remove a session if present. Racing close paths may both call
    /// this; the loser is a no-op. Returns whether this call removed it.
    pub fn remove(&self, id: SessionId) -> bool {
        self.sessions.lock().unwrap().remove(&id).is_some()
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    /// First session carrying `name`, scanning in admission order.
    /// Nicknames are not unique; on a collision the earliest admitted
    /// session wins, deterministically.
    pub fn find_by_nickname(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.nickname().as_deref() == Some(name))
            .cloned()
    }

    /// Point-in-time view in admission order. Sessions added or removed
    /// after the snapshot do not affect an iteration already underway.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OUTBOUND_CAPACITY;
    use tokio::sync::mpsc;

    fn admitted(nick: &str) -> Arc<Session> {
        // Receiver dropped: these sessions only exercise the map, and a
        // closed queue drops deliveries gracefully.
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let session = Arc::new(Session::new(tx));
        session.admit(nick.to_string());
        session
    }

    #[test]
    fn add_then_remove_roundtrip() {
        let registry = Registry::new();
        let session = admitted("alice");
        let id = session.id();

        registry.add(Arc::clone(&session)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(id).is_some());

        assert!(registry.remove(id));
        assert!(registry.is_empty());
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn remove_absent_is_noop() {
        let registry = Registry::new();
        assert!(!registry.remove(9999));
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let registry = Registry::new();
        let session = admitted("alice");
        registry.add(Arc::clone(&session)).unwrap();
        let err = registry.add(Arc::clone(&session)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSession(id) if id == session.id()));
        // The existing entry is untouched.
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn find_by_nickname_prefers_earliest_admitted() {
        let registry = Registry::new();
        let first = admitted("alice");
        let second = admitted("alice");
        registry.add(Arc::clone(&second)).unwrap();
        registry.add(Arc::clone(&first)).unwrap();

        // Map order is id order, not insertion order.
        let found = registry.find_by_nickname("alice").unwrap();
        assert_eq!(found.id(), first.id());
    }

    #[test]
    fn find_by_nickname_is_case_sensitive() {
        let registry = Registry::new();
        registry.add(admitted("Alice")).unwrap();
        assert!(registry.find_by_nickname("alice").is_none());
        assert!(registry.find_by_nickname("Alice").is_some());
    }

    #[test]
    fn snapshot_is_stable_under_mutation() {
        let registry = Registry::new();
        let a = admitted("a");
        let b = admitted("b");
        registry.add(Arc::clone(&a)).unwrap();
        registry.add(Arc::clone(&b)).unwrap();

        let snap = registry.snapshot();
        registry.remove(a.id());
        registry.add(admitted("c")).unwrap();

        // The snapshot still sees exactly {a, b}.
        let ids: Vec<_> = snap.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[test]
    fn concurrent_add_remove_snapshot_is_consistent() {
        let registry = Arc::new(Registry::new());
        let keep: Vec<Arc<Session>> = (0..8).map(|i| admitted(&format!("keep{i}"))).collect();
        let churn: Vec<Arc<Session>> = (0..8).map(|i| admitted(&format!("churn{i}"))).collect();

        let mut handles = Vec::new();
        for session in keep.iter().cloned() {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                registry.add(session).unwrap();
            }));
        }
        for session in churn.iter().cloned() {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                let id = session.id();
                registry.add(session).unwrap();
                registry.remove(id);
                // Second removal races with nothing and changes nothing.
                registry.remove(id);
            }));
        }
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    // Snapshots during churn must never observe a
                    // half-inserted entry.
                    for session in registry.snapshot() {
                        assert!(session.nickname().is_some());
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Final set is exactly the adds minus the removes.
        let mut expected: Vec<SessionId> = keep.iter().map(|s| s.id()).collect();
        expected.sort_unstable();
        let actual: Vec<SessionId> = registry.snapshot().iter().map(|s| s.id()).collect();
        assert_eq!(actual, expected);
    }
}
