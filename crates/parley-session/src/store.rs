use crate::session::{Session, SessionOptions};
use chrono::{DateTime, Utc};
use parley_core::{BridgeConfig, ParleyError, ParleyResult, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// A session behind its exclusive per-session region.
pub type SharedSession = Arc<Mutex<Session>>;

/// What one sweep pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Live sessions moved to `Expired`.
    pub expired: Vec<SessionId>,
    /// Terminal sessions dropped after their retention.
    pub removed: Vec<SessionId>,
}

/// Process-wide registry of sessions.
///
/// The map lock is held only to look up or insert an entry; all work on a
/// session happens under that session's own mutex.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SharedSession>>,
    config: BridgeConfig,
    options: SessionOptions,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let options = SessionOptions::from(&config);
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            options,
        })
    }

    /// Settings this store was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Returns the session for `session_id`, creating it if needed.
    ///
    /// With no id a fresh one is generated. A supplied id is validated
    /// before anything is touched; a known id returns the existing session.
    pub async fn open(&self, session_id: Option<&str>) -> ParleyResult<SharedSession> {
        let id = match session_id {
            Some(raw) => SessionId::parse(raw)?,
            None => SessionId::generate(),
        };

        if let Some(existing) = self.sessions.read().await.get(&id) {
            return Ok(existing.clone());
        }

        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(id.clone()).or_insert_with(|| {
            info!(session_id = %id, "session opened");
            Arc::new(Mutex::new(Session::new(id.clone(), &self.options)))
        });
        Ok(entry.clone())
    }

    /// Looks up a known session.
    pub async fn get(&self, session_id: &SessionId) -> ParleyResult<SharedSession> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ParleyError::NotFound(session_id.to_string()))
    }

    /// Validates a raw id and looks it up.
    pub async fn lookup(&self, raw: &str) -> ParleyResult<SharedSession> {
        let id = SessionId::parse(raw)?;
        self.get(&id).await
    }

    /// Marks a session `Complete` and frees its queues.
    pub async fn complete(&self, session_id: &SessionId) -> ParleyResult<()> {
        let shared = self.get(session_id).await?;
        let mut session = shared.lock().await;
        session.complete()?;
        session.release();
        info!(session_id = %session_id, "session completed");
        Ok(())
    }

    /// Expires sessions past their deadline and drops terminal sessions
    /// past their retention.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let snapshot: Vec<(SessionId, SharedSession)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();

        let retention = self.config.retention();
        let mut report = SweepReport::default();
        for (id, shared) in snapshot {
            let mut session = shared.lock().await;
            if session.is_due(now) {
                if session.expire(now) {
                    session.release();
                    info!(session_id = %id, "session expired");
                    report.expired.push(id);
                }
            } else if session.is_removable(now, retention) {
                report.removed.push(id);
            }
        }

        if !report.removed.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &report.removed {
                sessions.remove(id);
                debug!(session_id = %id, "terminal session removed");
            }
        }
        report
    }

    /// Drops a session outright.
    pub async fn remove(&self, session_id: &SessionId) -> Option<SharedSession> {
        self.sessions.write().await.remove(session_id)
    }

    /// Number of sessions held, terminal ones included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// True when no session is held.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of every held session.
    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Handles to every held session. The map lock is released before
    /// returning, so callers may lock sessions freely.
    pub async fn snapshot(&self) -> Vec<SharedSession> {
        self.sessions.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use parley_core::Payload;

    fn config() -> BridgeConfig {
        BridgeConfig {
            session_ttl_secs: 10,
            retention_secs: 100,
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let store = SessionStore::new(config());
        let a = store.open(Some("abc-123")).await.unwrap();
        let b = store.open(Some("abc-123")).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_open_without_id_generates_one() {
        let store = SessionStore::new(config());
        let a = store.open(None).await.unwrap();
        let b = store.open(None).await.unwrap();
        assert_ne!(a.lock().await.id, b.lock().await.id);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_id_without_side_effects() {
        let store = SessionStore::new(config());
        let long = "x".repeat(200);
        for bad in ["", "has space", "../etc", long.as_str()] {
            let err = store.open(Some(bad)).await.unwrap_err();
            assert!(matches!(err, ParleyError::InvalidSessionId(_)), "{bad:?}");
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = SessionStore::new(config());
        let err = store.lookup("nope").await.unwrap_err();
        assert!(matches!(err, ParleyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_complete_rejects_enqueue() {
        let store = SessionStore::new(config());
        let shared = store.open(Some("s1")).await.unwrap();
        let id = shared.lock().await.id.clone();
        store.complete(&id).await.unwrap();

        let mut session = shared.lock().await;
        assert_eq!(session.state(), SessionState::Complete);
        assert!(matches!(
            session.enqueue_outbound(Payload::agent_message("x")),
            Err(ParleyError::SessionClosed(_))
        ));
        drop(session);
        assert!(matches!(
            store.complete(&id).await,
            Err(ParleyError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_expires_then_removes() {
        let store = SessionStore::new(config());
        let shared = store.open(Some("idle")).await.unwrap();
        let id = shared.lock().await.id.clone();
        let now = Utc::now();

        let report = store.sweep(now).await;
        assert!(report.expired.is_empty());

        let report = store.sweep(now + chrono::Duration::seconds(11)).await;
        assert_eq!(report.expired, vec![id.clone()]);
        assert_eq!(shared.lock().await.state(), SessionState::Expired);

        // Kept for the retention window so late transports can be refused.
        let report = store.sweep(now + chrono::Duration::seconds(12)).await;
        assert!(report.removed.is_empty());
        assert_eq!(store.len().await, 1);

        let report = store.sweep(now + chrono::Duration::seconds(200)).await;
        assert_eq!(report.removed, vec![id]);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_stamps_expiry_with_sweep_time() {
        let store = SessionStore::new(config());
        let shared = store.open(Some("clocked")).await.unwrap();
        let id = shared.lock().await.id.clone();
        let at = Utc::now() + chrono::Duration::days(30);

        let report = store.sweep(at).await;
        assert_eq!(report.expired, vec![id.clone()]);
        assert_eq!(shared.lock().await.closed_at(), Some(at));

        // Retention counts from the sweep time, not the wall clock.
        let report = store.sweep(at + chrono::Duration::seconds(99)).await;
        assert!(report.removed.is_empty());
        let report = store.sweep(at + chrono::Duration::seconds(100)).await;
        assert_eq!(report.removed, vec![id]);
    }

    #[tokio::test]
    async fn test_activity_defers_expiry() {
        let store = SessionStore::new(config());
        let shared = store.open(Some("busy")).await.unwrap();
        let later = Utc::now() + chrono::Duration::seconds(8);
        shared.lock().await.touch(later);

        let report = store.sweep(later + chrono::Duration::seconds(5)).await;
        assert!(report.expired.is_empty());
    }
}
