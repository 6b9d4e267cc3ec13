//! WebSocket handler for realtime alert streaming
//!
//! Client messages:
//!
//! - `{"action": "join", "room": "alerts"}` / `{"action": "leave", "room": ...}`
//! - `{"action": "ping"}`, answered with `{"type": "pong"}`
//!
//! Every connection starts in the `dashboard` room.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, trace, warn};

use crate::api::state::ApiState;
use crate::realtime::events::ROOM_DASHBOARD;
use crate::realtime::{OutboundFrame, RealtimeNotifier};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientMessage {
    Join { room: String },
    Leave { room: String },
    Ping,
}

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let subscriber_id = uuid::Uuid::new_v4().to_string();
    let notifier = state.notifier;

    let mut outbound = notifier.connect(&subscriber_id).await;
    if let Err(e) = notifier.join_room(&subscriber_id, ROOM_DASHBOARD).await {
        warn!("failed to join {ROOM_DASHBOARD}: {e}");
    }

    let (mut sender, mut receiver) = socket.split();

    // Forward queued frames to the socket
    let send_id = subscriber_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let (message, closing) = match frame {
                OutboundFrame::Text(text) => (Message::Text(text), false),
                OutboundFrame::Ping => (Message::Ping(Vec::new()), false),
                OutboundFrame::Close => (Message::Close(None), true),
            };

            if sender.send(message).await.is_err() {
                debug!("websocket send failed for {send_id}, client disconnected");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let recv_notifier = notifier.clone();
    let recv_id = subscriber_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_client_message(&recv_notifier, &recv_id, &text).await,
                Message::Close(_) => break,
                Message::Pong(_) => trace!("pong from {recv_id}"),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    notifier.disconnect(&subscriber_id).await;
    info!("websocket subscriber {subscriber_id} disconnected");
}

async fn handle_client_message(notifier: &RealtimeNotifier, subscriber_id: &str, text: &str) {
    let result = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Join { room }) => notifier.join_room(subscriber_id, &room).await,
        Ok(ClientMessage::Leave { room }) => notifier.leave_room(subscriber_id, &room).await,
        Ok(ClientMessage::Ping) => {
            notifier
                .reply(subscriber_id, json!({ "type": "pong", "timestamp": Utc::now() }))
                .await
        }
        Err(e) => {
            debug!("unreadable message from {subscriber_id}: {e}");
            notifier
                .reply(
                    subscriber_id,
                    json!({ "type": "error", "message": format!("unsupported message: {e}") }),
                )
                .await
        }
    };

    if let Err(e) = result {
        debug!("failed to answer {subscriber_id}: {e}");
    }
}
