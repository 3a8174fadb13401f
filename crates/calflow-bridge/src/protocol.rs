//! Wire protocol between UI surfaces and the daemon.
//!
//! JSON messages tagged by `type`; binary payloads travel base64 encoded
//! inside the JSON.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use calflow_core::{InputType, Job, Session};
use serde::{Deserialize, Serialize};

/// Message from a UI surface to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Current job and authentication state.
    GetStatus,
    /// Install account credentials.
    AuthToken { token: String },
    /// Drop credentials and local state.
    AuthSignedOut,
    /// Submit inline text for extraction.
    SubmitText {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_type: Option<InputType>,
    },
    /// Submit a file for extraction (contents base64 encoded).
    SubmitFile {
        file_name: String,
        mime_type: String,
        data: String,
    },
    /// Fetch one cached session.
    OpenSession { session_id: String },
    /// Drop the current-job marker.
    ClearJob,
    /// Fetch all cached sessions.
    GetHistory,
    /// Remove a session everywhere.
    DismissSession { session_id: String },
    /// Push a processed session's events to the user's calendar.
    PushToCalendar { session_id: String },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Create a file submission from raw bytes.
    #[must_use]
    pub fn submit_file(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: &[u8],
    ) -> Self {
        Self::SubmitFile {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data: encode_bytes(data),
        }
    }
}

/// Message from the daemon to a UI surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Answer to `get_status`.
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job: Option<Job>,
        authenticated: bool,
    },
    /// A submission was accepted and polling started.
    Submitted { session_id: String },
    /// Answer to `open_session`.
    Session { session: Session },
    /// Full cache snapshot; also pushed once per connection at open.
    History { sessions: Vec<Session> },
    /// Answer to `push_to_calendar`.
    Pushed { pushed: usize },
    /// A session was inserted or updated.
    SessionSaved { session: Session },
    /// A session was removed.
    SessionDeleted { session_id: String },
    /// The cache was emptied.
    HistoryCleared,
    /// Request acknowledged, nothing to return.
    Ack,
    /// Request failed.
    Error { message: String },
    /// Pong response.
    Pong,
}

/// Encode binary payload data for the wire.
#[must_use]
pub fn encode_bytes(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode binary payload data from the wire.
#[must_use]
pub fn decode_bytes(data: &str) -> Option<Bytes> {
    BASE64.decode(data).ok().map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_payload_roundtrip() {
        let original = b"\x89PNG\r\n\x1a\n";
        let msg = ClientMessage::submit_file("flyer.png", "image/png", original);

        let ClientMessage::SubmitFile { data, .. } = &msg else {
            panic!("wrong message type");
        };
        assert_eq!(decode_bytes(data).unwrap().as_ref(), original);
    }

    #[test]
    fn test_invalid_base64_decodes_to_none() {
        assert!(decode_bytes("not base64!").is_none());
    }

    #[test]
    fn test_message_serialization() {
        let msg = ClientMessage::SubmitText {
            text: "soccer practice friday 4pm".to_string(),
            input_type: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"submit_text""#));
        assert!(!json.contains("input_type"));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        if let ClientMessage::SubmitText { text, input_type } = parsed {
            assert_eq!(text, "soccer practice friday 4pm");
            assert_eq!(input_type, None);
        } else {
            panic!("wrong message type");
        }
    }

    #[test]
    fn test_bare_variants_parse_from_tag_only() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"get_status"}"#).unwrap();
        assert!(matches!(parsed, ClientMessage::GetStatus));

        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"clear_job"}"#).unwrap();
        assert!(matches!(parsed, ClientMessage::ClearJob));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn test_status_message_shape() {
        let msg = ServerMessage::Status {
            job: None,
            authenticated: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"status","authenticated":true}"#);
    }
}
