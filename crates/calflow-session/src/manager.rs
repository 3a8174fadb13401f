//! Operation surface the bridge exposes to UI contexts.

use std::sync::{Arc, RwLock};

use bytes::Bytes;
use calflow_core::{
    BackendError, CalendarPush, CredentialCell, ExtractionBackend, FileUpload, InputType, Job,
    KeyValueStore, KvError, NewSession, RemoteSession, Session, SessionId,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::guest::GuestSessions;
use crate::poller::SessionPoller;
use crate::store::{SessionStore, StoreEvent};

/// Key the account bearer token persists under. Lives in the durable
/// scope so sign-in survives restarts.
const AUTH_KEY: &str = "auth_token";

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Storage error: {0}")]
    Storage(#[from] KvError),
    #[error("Session not found: {0}")]
    NotFound(SessionId),
}

/// Snapshot answering a status query.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Projection of the current job, when one exists.
    pub job: Option<Job>,
    /// Whether account credentials are installed.
    pub authenticated: bool,
}

/// Orchestrates the store, poller, reconciler, and guest records behind
/// one write path. The daemon owns exactly one manager; UI surfaces only
/// send intents to it.
pub struct SessionManager {
    store: Arc<SessionStore>,
    backend: Arc<dyn ExtractionBackend>,
    credentials: Arc<CredentialCell>,
    poller: Arc<SessionPoller>,
    guest: GuestSessions,
    durable: Arc<dyn KeyValueStore>,
    current_job: RwLock<Option<SessionId>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        backend: Arc<dyn ExtractionBackend>,
        credentials: Arc<CredentialCell>,
        poller: Arc<SessionPoller>,
        guest: GuestSessions,
        durable: Arc<dyn KeyValueStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            credentials,
            poller,
            guest,
            durable,
            current_job: RwLock::new(None),
        })
    }

    /// Restore persisted state. Called once at daemon startup, before the
    /// bridge accepts connections.
    pub async fn start(&self) {
        match self.durable.get(AUTH_KEY).await {
            Ok(Some(token)) if !token.is_empty() => {
                self.credentials.set_bearer(token);
            }
            Ok(_) => {}
            Err(e) => warn!("failed to read persisted credentials: {e}"),
        }
        self.store.load().await;
        self.guest.load().await;
        self.guest.cleanup_old_sessions().await;
    }

    /// Create a session from inline text and begin polling.
    ///
    /// Returns once the backend has assigned a session id; completion is
    /// observed through store events.
    ///
    /// # Errors
    /// Returns the backend failure when the create call fails; nothing is
    /// cached in that case.
    pub async fn submit_text(
        &self,
        text: impl Into<String>,
        input_type: InputType,
    ) -> Result<SessionId, ManagerError> {
        let req = NewSession::new(text, input_type);
        let auth = self.credentials.current();
        match self.backend.create_session(&auth, &req).await {
            Ok(remote) => Ok(self.adopt(remote, input_type).await),
            Err(e) => Err(self.backend_failure(e)),
        }
    }

    /// Create a session from an uploaded file and begin polling.
    ///
    /// # Errors
    /// Returns the backend failure when the upload fails.
    pub async fn submit_file(
        &self,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Bytes,
    ) -> Result<SessionId, ManagerError> {
        let upload = FileUpload::new(file_name, mime_type, data);
        let input_type = InputType::from_mime(&upload.mime_type);
        let auth = self.credentials.current();
        match self.backend.upload_file(&auth, &upload).await {
            Ok(remote) => Ok(self.adopt(remote, input_type).await),
            Err(e) => Err(self.backend_failure(e)),
        }
    }

    /// Current job projection and authentication flag.
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        let job = self
            .current_job
            .read()
            .ok()
            .and_then(|current| current.clone())
            .and_then(|id| self.store.get(&id))
            .map(|session| session.to_job());
        StatusSnapshot {
            job,
            authenticated: self.credentials.current().is_authenticated(),
        }
    }

    /// All cached sessions, most recently updated first.
    #[must_use]
    pub fn history(&self) -> Vec<Session> {
        self.store.get_all()
    }

    /// One cached session by id.
    ///
    /// # Errors
    /// Returns `NotFound` for ids not in the cache.
    pub fn open_session(&self, id: &str) -> Result<Session, ManagerError> {
        self.store
            .get(id)
            .ok_or_else(|| ManagerError::NotFound(id.to_string()))
    }

    /// Drop the current-job marker. The session itself stays cached.
    pub fn clear_job(&self) {
        if let Ok(mut current) = self.current_job.write() {
            *current = None;
        }
    }

    /// Remove a session from the cache and, eventually, from the remote
    /// history.
    pub async fn dismiss_session(&self, id: &str) {
        if let Ok(mut current) = self.current_job.write() {
            if current.as_deref() == Some(id) {
                *current = None;
            }
        }
        self.store.delete(id).await;
    }

    /// Install account credentials pushed from an auth surface.
    ///
    /// The token is persisted, then tracked guest sessions are folded
    /// into the account in the background.
    pub async fn sign_in(&self, token: impl Into<String>) {
        let token = token.into();
        self.credentials.set_bearer(token.clone());
        if let Err(e) = self.durable.set(AUTH_KEY, token).await {
            warn!("failed to persist credentials: {e}");
        }

        let guest = self.guest.clone();
        let auth = self.credentials.current();
        tokio::spawn(async move {
            guest.migrate(&auth).await;
        });
    }

    /// Drop credentials and the local cache. Remote history is kept.
    pub async fn sign_out(&self) {
        info!("signing out");
        self.credentials.clear();
        if let Err(e) = self.durable.remove(AUTH_KEY).await {
            warn!("failed to remove persisted credentials: {e}");
        }
        self.clear_job();
        self.store.clear().await;
    }

    /// Push a processed session's events to the user's calendar.
    ///
    /// # Errors
    /// Returns the backend failure to the requesting surface.
    pub async fn push_to_calendar(&self, id: &str) -> Result<CalendarPush, ManagerError> {
        let auth = self.credentials.current();
        match self.backend.push_events_to_calendar(&auth, id).await {
            Ok(result) => Ok(result),
            Err(e) => Err(self.backend_failure(e)),
        }
    }

    /// Subscribe to store change events, for bridge fan-out.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Adopt a freshly created backend session: cache it as pending, mark
    /// it the current job, and start its poll loop.
    async fn adopt(&self, remote: RemoteSession, input_type: InputType) -> SessionId {
        let id = remote.id.clone();
        let mut session = Session::pending(id.clone(), input_type);
        session.status = session.status.merge(remote.status);
        session.title = remote.title;
        session.access_token = remote.access_token.clone();

        if let Some(token) = &remote.access_token {
            // Guest mode: remember the per-session token for migration.
            self.guest.store_access_token(id.clone(), token.clone()).await;
        }

        if let Ok(mut current) = self.current_job.write() {
            *current = Some(id.clone());
        }
        self.store.save(session).await;
        self.poller.start(id.clone());
        info!(id = %id, kind = input_type.as_str(), "session submitted");
        id
    }

    fn backend_failure(&self, e: BackendError) -> ManagerError {
        if e.is_auth() {
            self.credentials.clear();
        }
        ManagerError::Backend(e)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use calflow_core::{BackendError, SessionStatus};

    use super::*;
    use crate::poller::PollerConfig;
    use crate::storage::MemoryStore;
    use crate::testing::{FakeBackend, RecordingNotifier, event, wait_for};

    struct Rig {
        manager: Arc<SessionManager>,
        store: Arc<SessionStore>,
        backend: Arc<FakeBackend>,
        credentials: Arc<CredentialCell>,
        guest: GuestSessions,
        durable: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn rig() -> Rig {
        let durable: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let store = Arc::new(SessionStore::new(Arc::new(MemoryStore::new()), 10));
        let backend = Arc::new(FakeBackend::default());
        let credentials = Arc::new(CredentialCell::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = SessionPoller::new(
            store.clone(),
            backend.clone(),
            credentials.clone(),
            notifier.clone(),
            PollerConfig {
                interval: Duration::from_millis(10),
                max_duration: Duration::from_millis(200),
            },
        );
        let guest = GuestSessions::new(backend.clone(), durable.clone());
        let manager = SessionManager::new(
            store.clone(),
            backend.clone(),
            credentials.clone(),
            poller,
            guest.clone(),
            durable.clone(),
        );
        Rig {
            manager,
            store,
            backend,
            credentials,
            guest,
            durable,
            notifier,
        }
    }

    #[tokio::test]
    async fn submit_text_runs_through_to_completion() {
        let rig = rig();
        rig.backend.set_create_response(FakeBackend::remote("s1", SessionStatus::Pending));
        rig.backend.events.lock().unwrap().push(event("Soccer practice"));
        rig.backend.script_session("s1", SessionStatus::Processing);
        rig.backend.script_session("s1", SessionStatus::Processed);

        let id = rig.manager.submit_text("practice friday 4pm", InputType::Text).await.unwrap();
        assert_eq!(id, "s1");

        // The submit itself only caches a pending session.
        let snapshot = rig.manager.status();
        let job = snapshot.job.expect("current job set right after submit");
        assert_eq!(job.session_id, "s1");
        assert_eq!(job.status, SessionStatus::Pending);
        assert!(!snapshot.authenticated);

        let store = rig.store.clone();
        assert!(
            wait_for(
                move || store.get("s1").is_some_and(|s| s.status == SessionStatus::Processed),
                Duration::from_secs(2),
            )
            .await
        );
        let job = rig.manager.status().job.unwrap();
        assert_eq!(job.status, SessionStatus::Processed);
        assert_eq!(job.event_count, 1);
        assert_eq!(rig.notifier.seen().len(), 1);
    }

    #[tokio::test]
    async fn guest_submit_records_access_token() {
        let rig = rig();
        let mut remote = FakeBackend::remote("s1", SessionStatus::Pending);
        remote.access_token = Some("guest-tok".to_string());
        rig.backend.set_create_response(remote);

        rig.manager.submit_text("block party saturday", InputType::Text).await.unwrap();

        assert_eq!(rig.guest.all_session_ids(), vec!["s1".to_string()]);
        assert_eq!(
            rig.store.get("s1").unwrap().access_token.as_deref(),
            Some("guest-tok")
        );
    }

    #[tokio::test]
    async fn submit_file_infers_input_type_from_mime() {
        let rig = rig();
        rig.backend.set_create_response(FakeBackend::remote("s2", SessionStatus::Pending));

        rig.manager
            .submit_file("flyer.png", "image/png", Bytes::from_static(b"\x89PNG"))
            .await
            .unwrap();

        assert_eq!(rig.store.get("s2").unwrap().input_type, InputType::Image);
    }

    #[tokio::test]
    async fn failed_submit_caches_nothing() {
        let rig = rig();
        rig.backend.set_create_error(BackendError::Api {
            status: 500,
            message: "pipeline down".to_string(),
        });

        let result = rig.manager.submit_text("text", InputType::Text).await;

        assert!(matches!(result, Err(ManagerError::Backend(_))));
        assert!(rig.store.is_empty());
        assert!(rig.manager.status().job.is_none());
    }

    #[tokio::test]
    async fn sign_in_persists_token_and_migrates_guests() {
        let rig = rig();
        rig.guest.store_access_token("abc123", "tok-1").await;

        rig.manager.sign_in("jwt-9").await;

        assert!(rig.manager.status().authenticated);
        assert_eq!(
            rig.durable.get("auth_token").await.unwrap(),
            Some("jwt-9".to_string())
        );

        let guest = rig.guest.clone();
        assert!(wait_for(move || guest.all_session_ids().is_empty(), Duration::from_secs(2)).await);
        assert!(rig.backend.calls().contains(&"claim:abc123:tok-1".to_string()));
    }

    #[tokio::test]
    async fn sign_out_clears_credentials_cache_and_job() {
        let rig = rig();
        rig.backend.set_create_response(FakeBackend::remote("s1", SessionStatus::Pending));
        rig.manager.sign_in("jwt-9").await;
        rig.manager.submit_text("text", InputType::Text).await.unwrap();

        rig.manager.sign_out().await;

        assert!(!rig.manager.status().authenticated);
        assert!(rig.manager.status().job.is_none());
        assert!(rig.store.is_empty());
        assert_eq!(rig.durable.get("auth_token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn dismiss_session_drops_cache_entry_and_job_marker() {
        let rig = rig();
        rig.backend.set_create_response(FakeBackend::remote("s1", SessionStatus::Pending));
        rig.manager.submit_text("text", InputType::Text).await.unwrap();

        rig.manager.dismiss_session("s1").await;

        assert!(rig.store.get("s1").is_none());
        assert!(rig.manager.status().job.is_none());
    }

    #[tokio::test]
    async fn open_session_reports_missing_ids() {
        let rig = rig();
        let result = rig.manager.open_session("ghost");
        assert!(matches!(result, Err(ManagerError::NotFound(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn startup_restores_persisted_credentials() {
        let rig = rig();
        rig.durable.set("auth_token", "jwt-old".to_string()).await.unwrap();

        rig.manager.start().await;

        assert!(rig.manager.status().authenticated);
        assert_eq!(rig.credentials.current().token(), Some("jwt-old"));
    }

    #[tokio::test]
    async fn clear_job_keeps_the_session_cached() {
        let rig = rig();
        rig.backend.set_create_response(FakeBackend::remote("s1", SessionStatus::Pending));
        rig.manager.submit_text("text", InputType::Text).await.unwrap();

        rig.manager.clear_job();

        assert!(rig.manager.status().job.is_none());
        assert!(rig.store.get("s1").is_some());
        assert_eq!(rig.manager.history().len(), 1);
    }
}
