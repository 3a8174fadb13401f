//! HTTP binding of the extraction backend contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, multipart};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use calflow_core::{
    AuthContext, BackendError, CalendarEvent, CalendarPush, ExtractionBackend, FileUpload,
    InputType, NewSession, RemoteSession, Session,
};

/// Per-request timeout for ordinary calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Uploads carry file bytes and get a longer budget.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying a guest session's own access token.
const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

#[derive(Debug, Serialize)]
struct CreateSessionBody<'a> {
    content: &'a str,
    input_type: &'static str,
    idempotency_key: Uuid,
}

#[derive(Debug, Serialize)]
struct ClaimSessionBody<'a> {
    access_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    events: Vec<CalendarEvent>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Extraction backend reached over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a client for the backend at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Attach account and/or per-session credentials to a request.
    fn with_auth(
        request: RequestBuilder,
        auth: &AuthContext,
        guest_token: Option<&str>,
    ) -> RequestBuilder {
        let request = match auth.token() {
            Some(token) => request.header("Authorization", format!("Bearer {token}")),
            None => request,
        };
        match guest_token {
            Some(token) => request.header(SESSION_TOKEN_HEADER, token),
            None => request,
        }
    }
}

async fn send_checked(request: RequestBuilder) -> Result<reqwest::Response, BackendError> {
    let response = request
        .send()
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(BackendError::Unauthorized);
    }
    Err(BackendError::Api {
        status: status.as_u16(),
        message: error_message(response).await,
    })
}

async fn error_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        return "unknown error".to_string();
    }
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.error,
        Err(_) => body,
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BackendError> {
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

fn file_part(upload: &FileUpload) -> multipart::Part {
    let part = multipart::Part::bytes(upload.data.to_vec()).file_name(upload.file_name.clone());
    // A malformed declared type falls back to octet-stream.
    match part.mime_str(&upload.mime_type) {
        Ok(part) => part,
        Err(_) => multipart::Part::bytes(upload.data.to_vec()).file_name(upload.file_name.clone()),
    }
}

#[async_trait]
impl ExtractionBackend for HttpBackend {
    async fn create_session(
        &self,
        auth: &AuthContext,
        req: &NewSession,
    ) -> Result<RemoteSession, BackendError> {
        let body = CreateSessionBody {
            content: &req.content,
            input_type: req.input_type.as_str(),
            idempotency_key: req.idempotency_key,
        };
        let request = Self::with_auth(
            self.client
                .post(self.url("/api/sessions"))
                .json(&body)
                .timeout(REQUEST_TIMEOUT),
            auth,
            None,
        );
        decode(send_checked(request).await?).await
    }

    async fn upload_file(
        &self,
        auth: &AuthContext,
        upload: &FileUpload,
    ) -> Result<RemoteSession, BackendError> {
        let form = multipart::Form::new()
            .part("file", file_part(upload))
            .text(
                "input_type",
                InputType::from_mime(&upload.mime_type).as_str(),
            )
            .text("idempotency_key", upload.idempotency_key.to_string());
        let request = Self::with_auth(
            self.client
                .post(self.url("/api/sessions/upload"))
                .multipart(form)
                .timeout(UPLOAD_TIMEOUT),
            auth,
            None,
        );
        decode(send_checked(request).await?).await
    }

    async fn get_session(
        &self,
        auth: &AuthContext,
        id: &str,
        guest_token: Option<&str>,
    ) -> Result<RemoteSession, BackendError> {
        let request = Self::with_auth(
            self.client
                .get(self.url(&format!("/api/sessions/{id}")))
                .timeout(REQUEST_TIMEOUT),
            auth,
            guest_token,
        );
        decode(send_checked(request).await?).await
    }

    async fn get_session_events(
        &self,
        auth: &AuthContext,
        id: &str,
        guest_token: Option<&str>,
    ) -> Result<Vec<CalendarEvent>, BackendError> {
        let request = Self::with_auth(
            self.client
                .get(self.url(&format!("/api/sessions/{id}/events")))
                .timeout(REQUEST_TIMEOUT),
            auth,
            guest_token,
        );
        let response: EventsResponse = decode(send_checked(request).await?).await?;
        Ok(response.events)
    }

    async fn push_events_to_calendar(
        &self,
        auth: &AuthContext,
        id: &str,
    ) -> Result<CalendarPush, BackendError> {
        let request = Self::with_auth(
            self.client
                .post(self.url(&format!("/api/sessions/{id}/calendar")))
                .timeout(REQUEST_TIMEOUT),
            auth,
            None,
        );
        decode(send_checked(request).await?).await
    }

    async fn claim_session(
        &self,
        auth: &AuthContext,
        id: &str,
        guest_token: &str,
    ) -> Result<(), BackendError> {
        let body = ClaimSessionBody {
            access_token: guest_token,
        };
        let request = Self::with_auth(
            self.client
                .post(self.url(&format!("/api/sessions/{id}/claim")))
                .json(&body)
                .timeout(REQUEST_TIMEOUT),
            auth,
            None,
        );
        send_checked(request).await?;
        Ok(())
    }

    async fn create_history(
        &self,
        auth: &AuthContext,
        session: &Session,
    ) -> Result<(), BackendError> {
        // Upsert keyed by session id, so a retried create cannot duplicate.
        let request = Self::with_auth(
            self.client
                .put(self.url(&format!("/api/history/{}", session.id)))
                .json(session)
                .timeout(REQUEST_TIMEOUT),
            auth,
            None,
        );
        send_checked(request).await?;
        Ok(())
    }

    async fn update_history(
        &self,
        auth: &AuthContext,
        session: &Session,
    ) -> Result<(), BackendError> {
        let request = Self::with_auth(
            self.client
                .patch(self.url(&format!("/api/history/{}", session.id)))
                .json(session)
                .timeout(REQUEST_TIMEOUT),
            auth,
            None,
        );
        send_checked(request).await?;
        Ok(())
    }

    async fn delete_history(&self, auth: &AuthContext, id: &str) -> Result<(), BackendError> {
        let request = Self::with_auth(
            self.client
                .delete(self.url(&format!("/api/history/{id}")))
                .timeout(REQUEST_TIMEOUT),
            auth,
            None,
        );
        match send_checked(request).await {
            // Already gone counts as deleted.
            Err(BackendError::Api { status: 404, .. }) | Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
