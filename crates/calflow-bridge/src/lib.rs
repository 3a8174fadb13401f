//! Bridge between UI surfaces and the session daemon.
//!
//! Provides:
//! - Wire protocol (JSON + base64)
//! - WebSocket transport (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{ClientMessage, ServerMessage};

#[cfg(feature = "websocket")]
pub use websocket::{BridgeState, create_bridge_router, ws_handler};
