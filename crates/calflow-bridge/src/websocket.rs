//! WebSocket bridge: every UI surface connects here and exchanges JSON
//! messages with the daemon's session engine.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use calflow_core::InputType;
use calflow_session::{SessionManager, StoreEvent};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use crate::protocol::{ClientMessage, ServerMessage, decode_bytes};

/// Shared state behind every bridge connection.
#[derive(Clone)]
pub struct BridgeState {
    /// The daemon's single session manager.
    pub manager: Arc<SessionManager>,
}

impl BridgeState {
    #[must_use]
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<BridgeState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: BridgeState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Every connection starts from a full snapshot, then follows store
    // events.
    let _ = tx.send(ServerMessage::History {
        sessions: state.manager.history(),
    });
    let push_task = tokio::spawn(forward_store_events(state.manager.clone(), tx.clone()));

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("websocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        dispatch(&state, client_msg, &tx).await;
    }

    push_task.abort();
    send_task.abort();
}

/// Handle one request message. Replies go through `tx` so responses and
/// pushed store events share a single ordered stream.
async fn dispatch(
    state: &BridgeState,
    msg: ClientMessage,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match msg {
        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
        ClientMessage::GetStatus => {
            let snapshot = state.manager.status();
            let _ = tx.send(ServerMessage::Status {
                job: snapshot.job,
                authenticated: snapshot.authenticated,
            });
        }
        ClientMessage::AuthToken { token } => {
            state.manager.sign_in(token).await;
            let _ = tx.send(ServerMessage::Ack);
        }
        ClientMessage::AuthSignedOut => {
            state.manager.sign_out().await;
            let _ = tx.send(ServerMessage::Ack);
        }
        ClientMessage::SubmitText { text, input_type } => {
            let kind = input_type.unwrap_or(InputType::Text);
            let result = state.manager.submit_text(text, kind).await;
            send_submit_reply(result.map_err(|e| e.to_string()), tx);
        }
        ClientMessage::SubmitFile {
            file_name,
            mime_type,
            data,
        } => {
            let Some(bytes) = decode_bytes(&data) else {
                let _ = tx.send(ServerMessage::Error {
                    message: "Invalid file data encoding".to_string(),
                });
                return;
            };
            let result = state.manager.submit_file(file_name, mime_type, bytes).await;
            send_submit_reply(result.map_err(|e| e.to_string()), tx);
        }
        ClientMessage::OpenSession { session_id } => {
            match state.manager.open_session(&session_id) {
                Ok(session) => {
                    let _ = tx.send(ServerMessage::Session { session });
                }
                Err(e) => {
                    let _ = tx.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
        ClientMessage::ClearJob => {
            state.manager.clear_job();
            let _ = tx.send(ServerMessage::Ack);
        }
        ClientMessage::GetHistory => {
            let _ = tx.send(ServerMessage::History {
                sessions: state.manager.history(),
            });
        }
        ClientMessage::DismissSession { session_id } => {
            state.manager.dismiss_session(&session_id).await;
            let _ = tx.send(ServerMessage::Ack);
        }
        ClientMessage::PushToCalendar { session_id } => {
            match state.manager.push_to_calendar(&session_id).await {
                Ok(result) => {
                    let _ = tx.send(ServerMessage::Pushed {
                        pushed: result.pushed,
                    });
                }
                Err(e) => {
                    let _ = tx.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

fn send_submit_reply(
    result: Result<String, String>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match result {
        Ok(session_id) => {
            let _ = tx.send(ServerMessage::Submitted { session_id });
        }
        Err(message) => {
            let _ = tx.send(ServerMessage::Error { message });
        }
    }
}

/// Forward store changes to one connection. A lagged receiver resyncs
/// with a fresh snapshot instead of dropping changes silently.
async fn forward_store_events(
    manager: Arc<SessionManager>,
    tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut events = manager.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => {
                let msg = match event {
                    StoreEvent::Saved(session) => ServerMessage::SessionSaved { session },
                    StoreEvent::Deleted(session_id) => ServerMessage::SessionDeleted { session_id },
                    StoreEvent::Cleared => ServerMessage::HistoryCleared,
                };
                if tx.send(msg).is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "store event stream lagged, resyncing");
                let snapshot = ServerMessage::History {
                    sessions: manager.history(),
                };
                if tx.send(snapshot).is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Create the bridge router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_bridge_router(manager));
/// ```
#[must_use]
pub fn create_bridge_router(manager: Arc<SessionManager>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(BridgeState::new(manager))
}
