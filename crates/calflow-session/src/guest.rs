//! Guest session tracking and migration.
//!
//! Sessions created before sign-in are readable only through their
//! per-session access token. Each one is recorded here so it can be
//! attached to the account once credentials arrive.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use calflow_core::{
    AuthContext, ExtractionBackend, GuestSessionRecord, KeyValueStore, SessionId, now_ms,
};
use chrono::TimeDelta;
use tracing::{debug, info, warn};

/// Key guest records persist under.
const GUEST_KEY: &str = "guest_sessions";

/// Records older than this are dropped regardless of migration status.
const RETENTION_DAYS: i64 = 7;

/// Tracks sessions created before authentication and folds them into the
/// account once the user signs in.
#[derive(Clone)]
pub struct GuestSessions {
    backend: Arc<dyn ExtractionBackend>,
    kv: Arc<dyn KeyValueStore>,
    records: Arc<RwLock<Vec<GuestSessionRecord>>>,
}

impl GuestSessions {
    #[must_use]
    pub fn new(backend: Arc<dyn ExtractionBackend>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            kv,
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Load persisted records. Called once at startup.
    pub async fn load(&self) {
        match self.kv.get(GUEST_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<GuestSessionRecord>>(&raw) {
                Ok(list) => {
                    if let Ok(mut records) = self.records.write() {
                        *records = list;
                    }
                }
                Err(e) => warn!("discarding unreadable guest records: {e}"),
            },
            Ok(None) => {}
            Err(e) => warn!("failed to read guest records: {e}"),
        }
    }

    /// Remember a guest session's access token. A repeated store for the
    /// same session replaces the old record.
    pub async fn store_access_token(
        &self,
        session_id: impl Into<SessionId>,
        token: impl Into<String>,
    ) {
        let record = GuestSessionRecord {
            session_id: session_id.into(),
            access_token: token.into(),
            created_at: now_ms(),
        };
        if let Ok(mut records) = self.records.write() {
            records.retain(|r| r.session_id != record.session_id);
            records.push(record);
        }
        self.persist().await;
    }

    /// Ids of all tracked guest sessions, oldest first.
    #[must_use]
    pub fn all_session_ids(&self) -> Vec<SessionId> {
        self.records
            .read()
            .map(|records| records.iter().map(|r| r.session_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Access token for one tracked session.
    #[must_use]
    pub fn token_for(&self, session_id: &str) -> Option<String> {
        self.records.read().ok()?.iter().find_map(|r| {
            (r.session_id == session_id).then(|| r.access_token.clone())
        })
    }

    /// Try to attach every tracked session to the authenticated account.
    ///
    /// Succeeding records are removed; failing ones stay for a later
    /// retry. Never raises.
    pub async fn migrate(&self, auth: &AuthContext) {
        if !auth.is_authenticated() {
            return;
        }
        let snapshot = self
            .records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default();
        if snapshot.is_empty() {
            return;
        }

        let mut migrated: Vec<SessionId> = Vec::new();
        for record in &snapshot {
            match self
                .backend
                .claim_session(auth, &record.session_id, &record.access_token)
                .await
            {
                Ok(()) => migrated.push(record.session_id.clone()),
                Err(e) => warn!(id = %record.session_id, "guest migration failed: {e}"),
            }
        }
        if migrated.is_empty() {
            return;
        }

        info!(
            migrated = migrated.len(),
            total = snapshot.len(),
            "guest sessions attached to account"
        );
        if let Ok(mut records) = self.records.write() {
            records.retain(|r| !migrated.contains(&r.session_id));
        }
        self.persist().await;
    }

    /// Drop records older than the retention window.
    pub async fn cleanup_old_sessions(&self) {
        let cutoff = now_ms() - TimeDelta::days(RETENTION_DAYS).num_milliseconds();
        let removed = match self.records.write() {
            Ok(mut records) => {
                let before = records.len();
                records.retain(|r| r.created_at >= cutoff);
                before - records.len()
            }
            Err(_) => 0,
        };
        if removed > 0 {
            debug!(removed, "expired guest records dropped");
            self.persist().await;
        }
    }

    /// Run cleanup on a fixed cadence until the process exits.
    pub fn spawn_cleanup_task(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                this.cleanup_old_sessions().await;
            }
        })
    }

    async fn persist(&self) {
        let snapshot = self
            .records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default();
        match serde_json::to_string(&snapshot) {
            Ok(raw) => {
                if let Err(e) = self.kv.set(GUEST_KEY, raw).await {
                    warn!("failed to persist guest records: {e}");
                }
            }
            Err(e) => warn!("failed to serialize guest records: {e}"),
        }
    }
}
