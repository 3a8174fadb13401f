//! Session records and their cross-context projections.

use serde::{Deserialize, Serialize};

/// Session identifier, assigned by the remote backend at creation.
pub type SessionId = String;

/// Session status.
///
/// Transitions only move forward along
/// `pending -> processing -> {processed | error}`. The two final states are
/// terminal: once reached, the status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created locally or queued remotely; no processing observed yet.
    Pending,
    /// The backend is extracting events.
    Processing,
    /// Extraction finished; events are available.
    Processed,
    /// Extraction failed, or the client gave up waiting.
    Error,
}

impl SessionStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Error)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Processed | Self::Error => 2,
        }
    }

    /// Merge an incoming status into the current one, keeping the lifetime
    /// monotonic: terminal states are frozen and a write never moves a
    /// session backwards.
    #[must_use]
    pub fn merge(self, incoming: Self) -> Self {
        if self.is_terminal() || incoming.rank() < self.rank() {
            self
        } else {
            incoming
        }
    }
}

/// The kind of input a session was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// Free text typed or pasted by the user.
    Text,
    /// An uploaded image.
    Image,
    /// An uploaded audio recording.
    Audio,
    /// Any other uploaded document.
    File,
    /// Text captured from the current page.
    Page,
}

impl InputType {
    /// Classify an uploaded file by its MIME type.
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            Self::Image
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else {
            Self::File
        }
    }

    /// Wire name of this input type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::File => "file",
            Self::Page => "page",
        }
    }
}

/// One extracted calendar event.
///
/// Times are RFC 3339 strings produced by the backend and passed through
/// untouched; `recurrence_rule` is an RFC 5545 RRULE. The engine never
/// computes with event times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Event title.
    pub title: String,
    /// Longer description, when the input provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Venue or address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Start instant, RFC 3339.
    pub start_time: String,
    /// End instant, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// RFC 5545 recurrence rule for repeating events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_rule: Option<String>,
}

/// The durable record of one input-to-events processing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier assigned by the remote backend.
    pub id: SessionId,
    /// Current processing status.
    pub status: SessionStatus,
    /// Short title, produced by the backend during processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// What kind of input created this session.
    pub input_type: InputType,
    /// Extracted events; empty until the session is processed.
    #[serde(default)]
    pub events: Vec<CalendarEvent>,
    /// User-facing failure description, set only when `status` is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Per-session read token for sessions created without authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
    /// Last update timestamp (Unix epoch milliseconds).
    pub updated_at: i64,
}

impl Session {
    /// Create a pending record for a freshly submitted input.
    #[must_use]
    pub fn pending(id: SessionId, input_type: InputType) -> Self {
        let now = now_ms();
        Self {
            id,
            status: SessionStatus::Pending,
            title: None,
            input_type,
            events: Vec::new(),
            error_message: None,
            access_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Projection handed to UI surfaces while the session is being polled.
    #[must_use]
    pub fn to_job(&self) -> Job {
        Job {
            session_id: self.id.clone(),
            status: self.status,
            event_count: self.events.len(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
        }
    }
}

/// Ephemeral, cross-context-visible projection of a session being polled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Session this job tracks.
    pub session_id: SessionId,
    /// Current processing status.
    pub status: SessionStatus,
    /// Number of extracted events so far.
    pub event_count: usize,
    /// Failure description, when the job ended in error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
}

/// A session created before authentication, tracked for later migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestSessionRecord {
    /// Session this token authorizes.
    pub session_id: SessionId,
    /// Per-session read/claim token.
    pub access_token: String,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
}

/// Current wall-clock time in Unix epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
