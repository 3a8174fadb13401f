//! Seam traits the session engine is built against.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::session::{CalendarEvent, InputType, Session, SessionId, SessionStatus};

/// Persisted key-value storage error.
#[derive(Debug, Error)]
pub enum KvError {
    /// The backing store is out of space.
    #[error("storage quota exceeded")]
    QuotaExceeded,
    /// Any other storage failure.
    #[error("storage error: {0}")]
    Internal(String),
}

/// Persistent key-value storage.
///
/// Deployments choose the backing at wiring time; callers never assume
/// which one they hold.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value by key.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Write a value, creating or replacing the key.
    async fn set(&self, key: &str, value: String) -> Result<(), KvError>;

    /// Delete a key. Missing keys are not an error.
    async fn remove(&self, key: &str) -> Result<(), KvError>;
}

/// Remote backend error.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Network-level failure; the request may never have reached the server.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered with a non-success status.
    #[error("backend error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Server-provided error description, when present.
        message: String,
    },
    /// Credentials missing, expired, or rejected.
    #[error("authentication required")]
    Unauthorized,
    /// The response body could not be decoded.
    #[error("invalid backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether this failure should clear stored credentials.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Snapshot of a session as reported by the remote backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSession {
    /// Backend-assigned session identifier.
    pub id: SessionId,
    /// Processing status on the backend.
    pub status: SessionStatus,
    /// Title, once the backend has produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Failure description, when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Per-session token, returned only for unauthenticated creates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Request to create a processing session from inline content.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Raw input text.
    pub content: String,
    /// How the content was captured.
    pub input_type: InputType,
    /// Client-generated key so a retried create cannot double-submit.
    pub idempotency_key: Uuid,
}

impl NewSession {
    /// Build a create request with a fresh idempotency key.
    #[must_use]
    pub fn new(content: impl Into<String>, input_type: InputType) -> Self {
        Self {
            content: content.into(),
            input_type,
            idempotency_key: Uuid::new_v4(),
        }
    }
}

/// Request to create a processing session from an uploaded file.
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// Original file name.
    pub file_name: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// Raw file bytes.
    pub data: Bytes,
    /// Client-generated key so a retried upload cannot double-submit.
    pub idempotency_key: Uuid,
}

impl FileUpload {
    /// Build an upload request with a fresh idempotency key.
    #[must_use]
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
            idempotency_key: Uuid::new_v4(),
        }
    }
}

/// Result of pushing a session's events to an external calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarPush {
    /// Number of events created in the user's calendar.
    pub pushed: usize,
}

/// Remote extraction backend.
///
/// All operations take an explicit [`AuthContext`]; guest reads carry the
/// session's own access token instead of account credentials.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Create a processing session from inline content.
    async fn create_session(
        &self,
        auth: &AuthContext,
        req: &NewSession,
    ) -> Result<RemoteSession, BackendError>;

    /// Create a processing session from an uploaded file.
    async fn upload_file(
        &self,
        auth: &AuthContext,
        upload: &FileUpload,
    ) -> Result<RemoteSession, BackendError>;

    /// Fetch the current snapshot of a session.
    async fn get_session(
        &self,
        auth: &AuthContext,
        id: &str,
        guest_token: Option<&str>,
    ) -> Result<RemoteSession, BackendError>;

    /// Fetch the extracted events of a session.
    async fn get_session_events(
        &self,
        auth: &AuthContext,
        id: &str,
        guest_token: Option<&str>,
    ) -> Result<Vec<CalendarEvent>, BackendError>;

    /// Push a processed session's events to the user's external calendar.
    async fn push_events_to_calendar(
        &self,
        auth: &AuthContext,
        id: &str,
    ) -> Result<CalendarPush, BackendError>;

    /// Attach a guest session to the authenticated account.
    async fn claim_session(
        &self,
        auth: &AuthContext,
        id: &str,
        guest_token: &str,
    ) -> Result<(), BackendError>;

    /// Create a session record in the account history store. Keyed by the
    /// session id, so a repeated create lands on the same record.
    async fn create_history(
        &self,
        auth: &AuthContext,
        session: &Session,
    ) -> Result<(), BackendError>;

    /// Update an existing history record.
    async fn update_history(
        &self,
        auth: &AuthContext,
        session: &Session,
    ) -> Result<(), BackendError>;

    /// Delete a session record from the account history store.
    async fn delete_history(&self, auth: &AuthContext, id: &str) -> Result<(), BackendError>;
}

/// Platform notification hook, fired when a session completes.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show a user-visible notification for a session.
    async fn notify(&self, session_id: &str, message: &str);
}
