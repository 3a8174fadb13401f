//! Poll loop driving sessions from creation to a terminal state.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use calflow_core::{
    AuthContext, CredentialCell, ExtractionBackend, Notifier, SessionId, SessionStatus,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::store::SessionStore;

/// Message written when the wall-clock budget is exhausted.
pub const TIMEOUT_MESSAGE: &str = "Processing timed out. Please try again.";
/// Message written when the backend reports failure without detail.
pub const DEFAULT_ERROR_MESSAGE: &str = "Processing failed. Please try again.";
/// Message written when credentials are rejected mid-poll.
pub const AUTH_ERROR_MESSAGE: &str = "Session expired. Please sign in again.";

/// Poll pacing and budget.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Fixed delay between status checks.
    pub interval: Duration,
    /// Wall-clock budget, measured from the loop's start. Transport
    /// failures do not reset it.
    pub max_duration: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_duration: Duration::from_secs(300),
        }
    }
}

enum TickOutcome {
    Continue,
    Done,
}

/// Drives sessions to a terminal state by repeated status checks against
/// the backend. At most one loop runs per session id.
pub struct SessionPoller {
    store: Arc<SessionStore>,
    backend: Arc<dyn ExtractionBackend>,
    credentials: Arc<CredentialCell>,
    notifier: Arc<dyn Notifier>,
    config: PollerConfig,
    active: Mutex<HashSet<SessionId>>,
}

impl SessionPoller {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        backend: Arc<dyn ExtractionBackend>,
        credentials: Arc<CredentialCell>,
        notifier: Arc<dyn Notifier>,
        config: PollerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            credentials,
            notifier,
            config,
            active: Mutex::new(HashSet::new()),
        })
    }

    /// Begin polling a session. Starting an id that is already being
    /// polled is a no-op. Completion is observed through the store, never
    /// returned.
    pub fn start(self: &Arc<Self>, session_id: SessionId) {
        {
            let Ok(mut active) = self.active.lock() else {
                return;
            };
            if !active.insert(session_id.clone()) {
                debug!(id = %session_id, "poll loop already active");
                return;
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(&session_id).await;
            if let Ok(mut active) = this.active.lock() {
                active.remove(&session_id);
            }
        });
    }

    /// Ids currently being polled.
    #[must_use]
    pub fn active_ids(&self) -> Vec<SessionId> {
        self.active
            .lock()
            .map(|active| active.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn run(&self, session_id: &str) {
        // Wall clock rather than a monotonic instant: a process suspended
        // mid-wait discovers the overrun on its next tick.
        let started = SystemTime::now();
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        info!(id = %session_id, "poll loop started");
        loop {
            interval.tick().await;

            if elapsed_since(started) > self.config.max_duration {
                self.finish_error(session_id, TIMEOUT_MESSAGE.to_string())
                    .await;
                info!(id = %session_id, "poll loop timed out");
                return;
            }

            match self.tick(session_id).await {
                TickOutcome::Continue => {}
                TickOutcome::Done => return,
            }
        }
    }

    async fn tick(&self, session_id: &str) -> TickOutcome {
        let auth = self.credentials.current();
        let guest_token = self.store.get(session_id).and_then(|s| s.access_token);

        let remote = match self
            .backend
            .get_session(&auth, session_id, guest_token.as_deref())
            .await
        {
            Ok(remote) => remote,
            Err(e) if e.is_auth() => {
                warn!(id = %session_id, "credentials rejected mid-poll");
                self.credentials.clear();
                self.finish_error(session_id, AUTH_ERROR_MESSAGE.to_string())
                    .await;
                return TickOutcome::Done;
            }
            Err(e) => {
                // Transport and server hiccups retry on the same cadence;
                // only the wall clock bounds them.
                debug!(id = %session_id, "status check failed: {e}");
                return TickOutcome::Continue;
            }
        };

        match remote.status {
            SessionStatus::Processed => {
                self.finish_processed(session_id, remote.title, &auth, guest_token.as_deref())
                    .await
            }
            SessionStatus::Error => {
                let message = remote
                    .error_message
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string());
                self.finish_error(session_id, message).await;
                TickOutcome::Done
            }
            SessionStatus::Pending | SessionStatus::Processing => {
                self.refresh_progress(session_id, remote.status, remote.title)
                    .await;
                TickOutcome::Continue
            }
        }
    }

    async fn finish_processed(
        &self,
        session_id: &str,
        title: Option<String>,
        auth: &AuthContext,
        guest_token: Option<&str>,
    ) -> TickOutcome {
        let events = match self
            .backend
            .get_session_events(auth, session_id, guest_token)
            .await
        {
            Ok(events) => events,
            Err(e) if e.is_auth() => {
                self.credentials.clear();
                self.finish_error(session_id, AUTH_ERROR_MESSAGE.to_string())
                    .await;
                return TickOutcome::Done;
            }
            Err(e) => {
                // The terminal write waits until the events can be fetched.
                debug!(id = %session_id, "event fetch failed: {e}");
                return TickOutcome::Continue;
            }
        };

        let Some(mut session) = self.store.get(session_id) else {
            return TickOutcome::Done;
        };
        session.status = SessionStatus::Processed;
        if title.is_some() {
            session.title = title;
        }
        session.events = events;
        session.error_message = None;
        let count = session.events.len();

        self.store.save(session).await;
        self.notifier
            .notify(session_id, &scheduled_summary(count))
            .await;
        info!(id = %session_id, events = count, "session processed");
        TickOutcome::Done
    }

    async fn finish_error(&self, session_id: &str, message: String) {
        let Some(mut session) = self.store.get(session_id) else {
            return;
        };
        session.status = SessionStatus::Error;
        session.error_message = Some(message);
        self.store.save(session).await;
    }

    async fn refresh_progress(
        &self,
        session_id: &str,
        status: SessionStatus,
        title: Option<String>,
    ) {
        let Some(mut session) = self.store.get(session_id) else {
            return;
        };
        let merged = session.status.merge(status);
        let title_changed = title.is_some() && title != session.title;
        if merged == session.status && !title_changed {
            return;
        }
        session.status = merged;
        if let Some(title) = title {
            session.title = Some(title);
        }
        self.store.save(session).await;
    }
}

fn elapsed_since(started: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(started)
        .unwrap_or(Duration::ZERO)
}

/// Notification body for a completed session.
fn scheduled_summary(count: usize) -> String {
    if count == 1 {
        "1 event scheduled".to_string()
    } else {
        format!("{count} events scheduled")
    }
}

/// Notifier for platforms without a notification surface; completions are
/// only logged.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, session_id: &str, message: &str) {
        info!(id = %session_id, "{message}");
    }
}
