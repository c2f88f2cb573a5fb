use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use event_channel::Connection;
use futures::{SinkExt, StreamExt};
use shared::{domain::ConnectionId, protocol::Envelope};
use tokio::sync::mpsc;
use tracing::debug;

use crate::AppState;

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
    let conn = Connection::new(ConnectionId::random(), outbound);

    let send_task = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    server_api::connect(&state.api, &conn).await;

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => server_api::dispatch(&state.api, &conn, envelope).await,
                Err(err) => debug!(connection = %conn.id(), %err, "dropping non-envelope frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    server_api::disconnect(&state.api, &conn).await;
    send_task.abort();
}
