use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::realtime::{Audience, ClientMessage, ServerEvent};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    // браузер не умеет выставлять заголовки при апгрейде
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

// GET /api/ws
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.user_id))
}

/// Пересылает события комнаты (или адресные) в очередь записи сокета.
fn forward(
    mut rx: broadcast::Receiver<ServerEvent>,
    tx: mpsc::UnboundedSender<ServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                // медленный клиент догонит через snapshot
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "slow websocket client, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: Option<Uuid>) {
    let connection_id = Uuid::new_v4().to_string();
    let coordinator = state.coordinator.clone();
    info!(%connection_id, user_id = ?user_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Один писатель на сокет, все остальные шлют через канал
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode server frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let _ = tx.send(coordinator.hello(&connection_id));

    let personal = user_id.map(|user_id| forward(state.hub.subscribe(Audience::User(user_id)), tx.clone()));
    let mut rooms: HashMap<Uuid, JoinHandle<()>> = HashMap::new();

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let message = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                debug!(%connection_id, error = %e, "unparseable client frame");
                if tx.send(ServerEvent::failed(None, "bad_request")).is_err() {
                    break;
                }
                continue;
            }
        };

        let reply = match message {
            ClientMessage::Join { event_id } => {
                if rooms.contains_key(&event_id) {
                    coordinator.snapshot(event_id).await
                } else {
                    let (room, snapshot) = coordinator.join(event_id).await;
                    rooms.insert(event_id, forward(room, tx.clone()));
                    snapshot
                }
            }
            ClientMessage::Hold {
                event_id,
                seat_no,
                ttl_secs,
                request_id,
            } => {
                coordinator
                    .hold(&connection_id, event_id, seat_no, ttl_secs, request_id)
                    .await
            }
            ClientMessage::Release {
                event_id,
                seat_no,
                request_id,
            } => {
                coordinator
                    .release(&connection_id, event_id, seat_no, request_id)
                    .await
            }
            ClientMessage::SnapshotRequest { event_id } => coordinator.snapshot(event_id).await,
            ClientMessage::Leave { event_id } => {
                if let Some(room) = rooms.remove(&event_id) {
                    room.abort();
                }
                ServerEvent::ok(None, None)
            }
        };

        if tx.send(reply).is_err() {
            break;
        }
    }

    for (_, room) in rooms {
        room.abort();
    }
    if let Some(personal) = personal {
        personal.abort();
    }
    let released = coordinator.on_disconnect(&connection_id).await;
    drop(tx);
    writer.abort();
    info!(%connection_id, released, "websocket closed");
}
