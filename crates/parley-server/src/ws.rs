//! WebSocket transport: one [`Session`](crate::hub::Session) per socket.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use parley_shared::protocol::ClientEvent;

use crate::api::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut session, mut outbound) = state.hub.connect().await;
    let conn = session.id();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match event.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Failed to encode server event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = %conn, error = %e, "WebSocket read failed");
                break;
            }
        };

        match ClientEvent::from_json(&text) {
            Ok(event) => session.handle(event).await,
            Err(e) => debug!(conn = %conn, error = %e, "Ignoring malformed frame"),
        }
    }

    debug!(conn = %conn, user = ?session.user(), "Socket closed");
    session.disconnect().await;
    writer.abort();
    let connections = state.hub.bus().connection_count().await;
    debug!(connections, "Connection released");
}
