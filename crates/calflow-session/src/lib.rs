//! Session lifecycle engine: local cache, poll loop, history
//! reconciliation, and guest migration.
//!
//! Provides:
//! - `SessionManager` - Single write path behind the bridge
//! - `SessionStore` - Capacity-bounded cache with a persisted snapshot
//! - `SessionPoller` - Drives sessions to a terminal state
//! - `BackendSync` - Fire-and-forget history reconciliation
//! - `GuestSessions` - Pre-auth session tracking and migration
//! - Storage implementations (memory, file)

pub mod guest;
pub mod manager;
pub mod poller;
pub mod storage;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use guest::GuestSessions;
pub use manager::{ManagerError, SessionManager, StatusSnapshot};
pub use poller::{LogNotifier, PollerConfig, SessionPoller};
pub use store::{DEFAULT_CAPACITY, SessionStore, StoreEvent, SyncHook};
pub use sync::BackendSync;
