//! In-memory state store for engine sessions (spec §4.2).
//!
//! The core is explicitly single-process and non-durable across restarts
//! (spec §1 Non-goals), so this holds everything behind a single
//! `RwLock<HashMap<..>>` rather than the teacher's RocksDB column families.
//! Mutation is still funneled through short, explicit critical sections —
//! the lock is never held across an `.await` on anything but the lock
//! acquisition itself.

use crate::error::{MakerError, MakerResult};
use crate::state::types::{MakerConfig, Session, SessionId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Owns every session plus the globally active session pointer and config.
/// Cloned out as a snapshot for the Notifier rather than handed out by
/// reference, so callers never hold the lock across their own processing.
pub struct StateStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    active_session_id: RwLock<Option<SessionId>>,
    config: RwLock<MakerConfig>,
}

impl StateStore {
    pub fn new(config: MakerConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            active_session_id: RwLock::new(None),
            config: RwLock::new(config),
        }
    }

    fn lock_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_sessions_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_session(&self, session: Session) {
        self.lock_sessions_mut().insert(session.task_id.clone(), session);
    }

    pub fn get_session(&self, id: &str) -> MakerResult<Session> {
        self.lock_sessions()
            .get(id)
            .cloned()
            .ok_or_else(|| MakerError::UnknownSession {
                session_id: id.to_string(),
            })
    }

    pub fn with_session_mut<F, T>(&self, id: &str, f: F) -> MakerResult<T>
    where
        F: FnOnce(&mut Session) -> T,
    {
        let mut guard = self.lock_sessions_mut();
        let session = guard.get_mut(id).ok_or_else(|| MakerError::UnknownSession {
            session_id: id.to_string(),
        })?;
        Ok(f(session))
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        self.lock_sessions().values().cloned().collect()
    }

    pub fn remove_session(&self, id: &str) -> Option<Session> {
        self.lock_sessions_mut().remove(id)
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.active_session_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_active_session_id(&self, id: Option<SessionId>) {
        *self.active_session_id.write().unwrap_or_else(|e| e.into_inner()) = id;
    }

    pub fn config(&self) -> MakerConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_config(&self, patch: &serde_json::Value) -> MakerResult<MakerConfig> {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        guard.merge_patch(patch)?;
        Ok(guard.clone())
    }

    /// Global active-worker count across every session, the figure the
    /// Scheduler checks against `max_parallelism` (spec §4.11).
    pub fn global_active_workers(&self) -> usize {
        self.lock_sessions().values().map(|s| s.active_workers()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_returns_typed_error() {
        let store = StateStore::new(MakerConfig::default());
        let err = store.get_session("missing").unwrap_err();
        assert_eq!(err.code(), "ERR_UNKNOWN_SESSION");
    }

    #[test]
    fn insert_and_fetch_round_trips() {
        let store = StateStore::new(MakerConfig::default());
        store.insert_session(Session::new("t1", "build a thing"));
        let session = store.get_session("t1").unwrap();
        assert_eq!(session.original_prompt, "build a thing");
    }

    #[test]
    fn update_config_rejects_bad_patch() {
        let store = StateStore::new(MakerConfig::default());
        let err = store.update_config(&serde_json::json!({ "risk_threshold": 5.0 })).unwrap_err();
        assert_eq!(err.code(), "ERR_CONFIG");
    }
}
