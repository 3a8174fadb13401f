//! Scripted doubles shared by the crate's tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use calflow_core::{
    AuthContext, BackendError, CalendarEvent, CalendarPush, ExtractionBackend, FileUpload,
    NewSession, Notifier, RemoteSession, Session, SessionId, SessionStatus,
};

use crate::store::SyncHook;

/// Backend double with per-method scripts and a recorded call log.
#[derive(Default)]
pub(crate) struct FakeBackend {
    log: Mutex<Vec<String>>,
    /// Successive `get_session` responses; once drained, every further
    /// check reports `processing`.
    pub session_script: Mutex<VecDeque<Result<RemoteSession, BackendError>>>,
    /// Events returned by `get_session_events`.
    pub events: Mutex<Vec<CalendarEvent>>,
    /// One-shot error for the next create or upload.
    create_error: Mutex<Option<BackendError>>,
    /// Session returned by create and upload calls.
    create_response: Mutex<Option<RemoteSession>>,
    /// One-shot errors per id for history creates.
    pub history_errors: Mutex<HashMap<SessionId, BackendError>>,
    /// One-shot errors per id for claims.
    pub claim_errors: Mutex<HashMap<SessionId, BackendError>>,
}

impl FakeBackend {
    pub fn remote(id: &str, status: SessionStatus) -> RemoteSession {
        RemoteSession {
            id: id.to_string(),
            status,
            title: None,
            error_message: None,
            access_token: None,
        }
    }

    pub fn script_session(&self, id: &str, status: SessionStatus) {
        self.session_script
            .lock()
            .unwrap()
            .push_back(Ok(Self::remote(id, status)));
    }

    pub fn script_session_err(&self, err: BackendError) {
        self.session_script.lock().unwrap().push_back(Err(err));
    }

    pub fn set_create_response(&self, remote: RemoteSession) {
        *self.create_response.lock().unwrap() = Some(remote);
    }

    pub fn set_create_error(&self, err: BackendError) {
        *self.create_error.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn created(&self) -> Result<RemoteSession, BackendError> {
        if let Some(err) = self.create_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self
            .create_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Self::remote("fake-id", SessionStatus::Pending)))
    }
}

#[async_trait]
impl ExtractionBackend for FakeBackend {
    async fn create_session(
        &self,
        _auth: &AuthContext,
        req: &NewSession,
    ) -> Result<RemoteSession, BackendError> {
        self.record(format!("create_session:{}", req.input_type.as_str()));
        self.created()
    }

    async fn upload_file(
        &self,
        _auth: &AuthContext,
        upload: &FileUpload,
    ) -> Result<RemoteSession, BackendError> {
        self.record(format!("upload_file:{}", upload.file_name));
        self.created()
    }

    async fn get_session(
        &self,
        _auth: &AuthContext,
        id: &str,
        _guest_token: Option<&str>,
    ) -> Result<RemoteSession, BackendError> {
        self.record(format!("get_session:{id}"));
        match self.session_script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(Self::remote(id, SessionStatus::Processing)),
        }
    }

    async fn get_session_events(
        &self,
        _auth: &AuthContext,
        id: &str,
        _guest_token: Option<&str>,
    ) -> Result<Vec<CalendarEvent>, BackendError> {
        self.record(format!("get_events:{id}"));
        Ok(self.events.lock().unwrap().clone())
    }

    async fn push_events_to_calendar(
        &self,
        _auth: &AuthContext,
        id: &str,
    ) -> Result<CalendarPush, BackendError> {
        self.record(format!("push_calendar:{id}"));
        Ok(CalendarPush {
            pushed: self.events.lock().unwrap().len(),
        })
    }

    async fn claim_session(
        &self,
        _auth: &AuthContext,
        id: &str,
        guest_token: &str,
    ) -> Result<(), BackendError> {
        self.record(format!("claim:{id}:{guest_token}"));
        match self.claim_errors.lock().unwrap().remove(id) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn create_history(
        &self,
        _auth: &AuthContext,
        session: &Session,
    ) -> Result<(), BackendError> {
        self.record(format!("create_history:{}", session.id));
        match self.history_errors.lock().unwrap().remove(&session.id) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn update_history(
        &self,
        _auth: &AuthContext,
        session: &Session,
    ) -> Result<(), BackendError> {
        self.record(format!("update_history:{}", session.id));
        Ok(())
    }

    async fn delete_history(&self, _auth: &AuthContext, id: &str) -> Result<(), BackendError> {
        self.record(format!("delete_history:{id}"));
        Ok(())
    }
}

/// Notifier that records every message it is asked to show.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    messages: Mutex<Vec<(SessionId, String)>>,
}

impl RecordingNotifier {
    pub fn seen(&self) -> Vec<(SessionId, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, session_id: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((session_id.to_string(), message.to_string()));
    }
}

/// Sync hook that records the ids it was handed.
#[derive(Default)]
pub(crate) struct RecordingHook {
    saved: Mutex<Vec<SessionId>>,
    dismissed: Mutex<Vec<SessionId>>,
}

impl RecordingHook {
    pub fn saved(&self) -> Vec<SessionId> {
        self.saved.lock().unwrap().clone()
    }

    pub fn dismissed(&self) -> Vec<SessionId> {
        self.dismissed.lock().unwrap().clone()
    }
}

impl SyncHook for RecordingHook {
    fn session_saved(&self, session: &Session) {
        self.saved.lock().unwrap().push(session.id.clone());
    }

    fn session_dismissed(&self, id: &SessionId) {
        self.dismissed.lock().unwrap().push(id.clone());
    }
}

/// Sample extracted event.
pub(crate) fn event(title: &str) -> CalendarEvent {
    CalendarEvent {
        title: title.to_string(),
        description: None,
        location: None,
        start_time: "2026-03-01T15:00:00-05:00".to_string(),
        end_time: None,
        recurrence_rule: None,
    }
}

/// Poll until `predicate` holds or the deadline passes.
pub(crate) async fn wait_for(predicate: impl Fn() -> bool, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}
