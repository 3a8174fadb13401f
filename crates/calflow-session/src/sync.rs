//! Background reconciliation of the local cache with the account history
//! store.
//!
//! Everything here is fire-and-forget: failures are logged, never
//! surfaced, and the local cache stays authoritative for the UI.

use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};

use calflow_core::{CredentialCell, ExtractionBackend, KeyValueStore, Session, SessionId};
use tracing::{debug, warn};

use crate::store::SyncHook;

/// Key the known-to-backend id set persists under.
const KNOWN_KEY: &str = "known_backend_ids";

/// Mirrors local cache changes into the account history store.
///
/// A per-id "known to backend" set decides between create and update
/// calls. The set is persisted, so a restart cannot forget which records
/// already exist remotely.
#[derive(Clone)]
pub struct BackendSync {
    backend: Arc<dyn ExtractionBackend>,
    credentials: Arc<CredentialCell>,
    kv: Arc<dyn KeyValueStore>,
    known: Arc<RwLock<HashSet<SessionId>>>,
}

impl BackendSync {
    #[must_use]
    pub fn new(
        backend: Arc<dyn ExtractionBackend>,
        credentials: Arc<CredentialCell>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            backend,
            credentials,
            kv,
            known: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Load the persisted known-id set. Called once at startup.
    pub async fn load(&self) {
        match self.kv.get(KNOWN_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<SessionId>>(&raw) {
                Ok(ids) => {
                    if let Ok(mut known) = self.known.write() {
                        known.extend(ids);
                    }
                }
                Err(e) => warn!("discarding unreadable known-id set: {e}"),
            },
            Ok(None) => {}
            Err(e) => warn!("failed to read known-id set: {e}"),
        }
    }

    /// Create or update this session's remote history record.
    ///
    /// Sessions without account credentials are skipped; a guest session
    /// has no history to reconcile into.
    pub async fn sync(&self, session: &Session) {
        let auth = self.credentials.current();
        if !auth.is_authenticated() {
            return;
        }

        if self.is_known(&session.id) {
            if let Err(e) = self.backend.update_history(&auth, session).await {
                self.note_failure(&e);
                warn!(id = %session.id, "history update failed: {e}");
            }
        } else {
            match self.backend.create_history(&auth, session).await {
                Ok(()) => {
                    // Only a confirmed create marks the id known; a failed
                    // one retries as a create next time.
                    self.mark_known(&session.id).await;
                    debug!(id = %session.id, "history record created");
                }
                Err(e) => {
                    self.note_failure(&e);
                    warn!(id = %session.id, "history create failed: {e}");
                }
            }
        }
    }

    /// Remove this session's remote history record, if one was ever
    /// created.
    pub async fn delete(&self, id: &str) {
        let auth = self.credentials.current();
        if !auth.is_authenticated() || !self.is_known(id) {
            return;
        }
        match self.backend.delete_history(&auth, id).await {
            Ok(()) => self.forget(id).await,
            Err(e) => {
                self.note_failure(&e);
                warn!(id, "history delete failed: {e}");
            }
        }
    }

    fn is_known(&self, id: &str) -> bool {
        self.known.read().map(|k| k.contains(id)).unwrap_or(false)
    }

    async fn mark_known(&self, id: &str) {
        let inserted = self
            .known
            .write()
            .map(|mut k| k.insert(id.to_string()))
            .unwrap_or(false);
        if inserted {
            self.persist_known().await;
        }
    }

    async fn forget(&self, id: &str) {
        let removed = self
            .known
            .write()
            .map(|mut k| k.remove(id))
            .unwrap_or(false);
        if removed {
            self.persist_known().await;
        }
    }

    async fn persist_known(&self) {
        let ids: Vec<SessionId> = match self.known.read() {
            Ok(known) => known.iter().cloned().collect(),
            Err(_) => return,
        };
        match serde_json::to_string(&ids) {
            Ok(raw) => {
                if let Err(e) = self.kv.set(KNOWN_KEY, raw).await {
                    warn!("failed to persist known-id set: {e}");
                }
            }
            Err(e) => warn!("failed to serialize known-id set: {e}"),
        }
    }

    fn note_failure(&self, e: &calflow_core::BackendError) {
        if e.is_auth() {
            warn!("history call rejected, clearing credentials");
            self.credentials.clear();
        }
    }
}

impl SyncHook for BackendSync {
    fn session_saved(&self, session: &Session) {
        let this = self.clone();
        let session = session.clone();
        tokio::spawn(async move {
            this.sync(&session).await;
        });
    }

    fn session_dismissed(&self, id: &SessionId) {
        let this = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            this.delete(&id).await;
        });
    }
}
