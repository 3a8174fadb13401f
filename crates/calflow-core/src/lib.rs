//! Core types and traits for the calflow session engine.
//!
//! This crate provides the fundamental building blocks:
//! - `Session`, `Job`, `GuestSessionRecord` - durable records and their
//!   cross-context projections
//! - `AuthContext` + `CredentialCell` - explicit credential handling
//! - `KeyValueStore`, `ExtractionBackend`, `Notifier` traits

pub mod auth;
pub mod session;
pub mod traits;

pub use auth::{AuthContext, CredentialCell};
pub use session::{
    CalendarEvent, GuestSessionRecord, InputType, Job, Session, SessionId, SessionStatus, now_ms,
};
pub use traits::{
    BackendError, CalendarPush, ExtractionBackend, FileUpload, KeyValueStore, KvError, NewSession,
    Notifier, RemoteSession,
};
