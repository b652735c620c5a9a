//! WebSocket Transport for Live Revision Sessions
//!
//! One connection per session: each text frame from the client is one user
//! message, answered with one JSON turn frame. When the session finishes, a
//! final `session_complete` frame is sent and the connection closes.
//! Processing failures produce an error frame rather than dropping the
//! connection.

use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use revise_core::machine::{MessageFormat, ResponseBody, TurnResponse};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Frames sent from the server to the client.
#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// One tutoring turn.
    Message {
        content: ResponseBody,
        message_format: MessageFormat,
        conversation_count: u32,
        is_session_complete: bool,
        current_stage: String,
    },
    /// The closing summary once the session is complete.
    SessionComplete { summary: String },
    /// A processing error the client should surface and may retry.
    Error { content: String },
}

impl ServerFrame {
    fn from_turn(turn: &TurnResponse) -> Self {
        ServerFrame::Message {
            content: turn.messages.clone(),
            message_format: turn.message_format,
            conversation_count: turn.conversation_count,
            is_session_complete: turn.is_session_complete,
            current_stage: turn.current_stage.clone(),
        }
    }
}

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Main loop for an individual WebSocket connection.
#[instrument(name = "ws_revision", skip_all, fields(%session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    info!("WebSocket connection established");
    let (mut sink, mut stream) = socket.split();

    while let Some(incoming) = next_text(&mut stream).await {
        let user_message = match incoming {
            Ok(text) => text,
            Err(()) => break,
        };

        match run_turn(&state, &session_id, &user_message).await {
            Ok(turn) => {
                if send_frame(&mut sink, ServerFrame::from_turn(&turn)).await.is_err() {
                    break;
                }
                if turn.is_session_complete {
                    let summary = match &turn.messages {
                        ResponseBody::Single(text) => text.clone(),
                        ResponseBody::Bubbles(_) => "Session completed successfully!".to_string(),
                    };
                    let _ = send_frame(&mut sink, ServerFrame::SessionComplete { summary }).await;
                    break;
                }
            }
            Err(error) => {
                error!(?error, "failed to process message");
                let frame = ServerFrame::Error {
                    content: "I'm having trouble processing your message. Please try again."
                        .to_string(),
                };
                if send_frame(&mut sink, frame).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

/// Runs one state machine pass under the session's lock.
async fn run_turn(state: &AppState, session_id: &str, text: &str) -> Result<TurnResponse> {
    let lock = state.locks.lock_for(session_id);
    let _guard = lock.lock().await;
    state.machine.handle(session_id, text).await
}

/// Waits for the next text frame, skipping pings; `Err(())` means the client
/// is gone.
async fn next_text(stream: &mut SplitStream<WebSocket>) -> Option<Result<String, ()>> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
            Ok(Message::Close(_)) => {
                info!("Client sent close frame");
                return Some(Err(()));
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) => {
                warn!("Ignoring unexpected binary frame");
                continue;
            }
            Err(error) => {
                error!(?error, "error receiving from client WebSocket");
                return Some(Err(()));
            }
        }
    }
}

/// Serializes and sends one frame to the client.
async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, frame: ServerFrame) -> Result<()> {
    let serialized = serde_json::to_string(&frame)?;
    sink.send(Message::Text(serialized.into())).await?;
    Ok(())
}
