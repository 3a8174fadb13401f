//! Credential handling for remote calls.
//!
//! Credentials are never ambient: every remote call receives an explicit
//! [`AuthContext`] snapshotted from the single [`CredentialCell`] the daemon
//! owns. Changing or clearing the cell affects subsequent snapshots only,
//! never in-flight operations.

use std::sync::RwLock;

use tracing::info;

/// Credentials attached to a remote-backend call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    bearer: Option<String>,
}

impl AuthContext {
    /// Context for unauthenticated (guest) operation.
    #[must_use]
    pub fn anonymous() -> Self {
        Self { bearer: None }
    }

    /// Context carrying an account bearer token.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(token.into()),
        }
    }

    /// Whether an account credential is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.bearer.is_some()
    }

    /// The bearer token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.bearer.as_deref()
    }
}

/// Process-wide credential slot with a defined init/update/clear lifecycle.
#[derive(Debug, Default)]
pub struct CredentialCell {
    inner: RwLock<AuthContext>,
}

impl CredentialCell {
    /// Create an empty cell (anonymous until a token is installed).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current credentials.
    #[must_use]
    pub fn current(&self) -> AuthContext {
        self.inner.read().map(|ctx| ctx.clone()).unwrap_or_default()
    }

    /// Install an account bearer token.
    pub fn set_bearer(&self, token: impl Into<String>) {
        if let Ok(mut ctx) = self.inner.write() {
            *ctx = AuthContext::bearer(token);
            info!("account credentials installed");
        }
    }

    /// Drop any stored credentials, returning to anonymous operation.
    pub fn clear(&self) {
        if let Ok(mut ctx) = self.inner.write() {
            if ctx.is_authenticated() {
                info!("account credentials cleared");
            }
            *ctx = AuthContext::anonymous();
        }
    }
}
