//! WebSocket transport for the synchronization channel.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};

use super::protocol::ClientEvent;
use super::service::{Connection, SyncService};
use crate::AppState;

/// GET /ws - Upgrade to the synchronization channel.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let sync = state.sync.clone();
    ws.on_upgrade(move |socket| handle_socket(sync, socket))
}

async fn handle_socket(sync: Arc<SyncService>, socket: WebSocket) {
    let Connection { id, mut frames } = match sync.connect().await {
        Ok(connection) => connection,
        Err(e) => {
            tracing::error!("Failed to register client: {}", e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer: drains this client's queue until the hub drops its sender.
    let write_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if ws_sender.send(Message::text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(result) = ws_receiver.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(client_id = id, "Channel read error: {}", e);
                break;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => continue,
        };

        let result = match ClientEvent::decode(text.as_str()) {
            Ok(ClientEvent::UpdateExpedientes(payload)) => {
                sync.submit_update(id, payload).await.map(|_| ())
            }
            Ok(ClientEvent::GetLatest) => sync.request_latest(id).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::warn!(client_id = id, "Rejected frame: {}", e);
            sync.reject(id, &e).await;
        }
    }

    sync.disconnect(id).await;
    let _ = write_task.await;
}
