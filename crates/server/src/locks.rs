//! Per-session advisory locks.
//!
//! Chunk writes take the shared side so distinct indices still land in
//! parallel. Merge and abort take the exclusive side, so no write can be in
//! flight between the completeness check and the read of the chunk bytes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tessera_core::SessionId;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type Entry = Arc<RwLock<()>>;

/// Lock table keyed by session.
#[derive(Default)]
pub struct SessionLocks {
    table: Mutex<HashMap<SessionId, Entry>>,
}

enum Held {
    Shared { _guard: OwnedRwLockReadGuard<()> },
    Exclusive { _guard: OwnedRwLockWriteGuard<()> },
}

/// Guard for one session. Dropping it releases the lock and prunes the
/// table entry once nobody else references it.
pub struct SessionLockGuard<'a> {
    locks: &'a SessionLocks,
    session_id: SessionId,
    held: Option<Held>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, session_id: SessionId) -> Entry {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.entry(session_id).or_default().clone()
    }

    /// Acquire the shared side (chunk writes).
    pub async fn shared(&self, session_id: SessionId) -> SessionLockGuard<'_> {
        let guard = self.entry(session_id).read_owned().await;
        SessionLockGuard {
            locks: self,
            session_id,
            held: Some(Held::Shared { _guard: guard }),
        }
    }

    /// Acquire the exclusive side (merge, abort).
    pub async fn exclusive(&self, session_id: SessionId) -> SessionLockGuard<'_> {
        let guard = self.entry(session_id).write_owned().await;
        SessionLockGuard {
            locks: self,
            session_id,
            held: Some(Held::Exclusive { _guard: guard }),
        }
    }

    /// Number of sessions with a live table entry.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, session_id: SessionId) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // Only the table itself holds a reference: no holder, no waiter.
        if table
            .get(&session_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            table.remove(&session_id);
        }
    }
}

impl Drop for SessionLockGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.locks.prune(self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shared_guards_coexist() {
        let locks = SessionLocks::new();
        let id = SessionId::new();
        let a = locks.shared(id).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.shared(id))
            .await
            .expect("second shared guard should not block");
        drop(a);
        drop(b);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_shared() {
        let locks = SessionLocks::new();
        let id = SessionId::new();
        let shared = locks.shared(id).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.exclusive(id)).await;
        assert!(blocked.is_err());
        drop(shared);
        let _exclusive = locks.exclusive(id).await;
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_sessions_do_not_contend() {
        let locks = SessionLocks::new();
        let _a = locks.exclusive(SessionId::new()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.exclusive(SessionId::new()))
            .await;
        assert!(b.is_ok());
    }
}
