//! WebSocket notification hub: fans the bus out to connected browser/UI
//! clients as JSON frames (spec §6 External Interfaces).

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use tracing::debug;

use crate::bus::SharedBus;

/// GET /ws - upgrades to a long-lived notification feed. Each connection
/// gets its own bus subscription; a lagging client only drops its own
/// missed notifications, per the broadcast channel's per-subscriber
/// buffering (spec §5 shared-resource notes).
pub async fn ws_handler(State(bus): State<SharedBus>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, bus))
}

async fn handle_socket(mut socket: WebSocket, bus: SharedBus) {
    let mut rx = bus.subscribe();
    loop {
        tokio::select! {
            notification = rx.recv() => {
                match notification {
                    Ok(envelope) => {
                        let Ok(json) = serde_json::to_string(&envelope) else { continue };
                        if socket.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!("ws subscriber lagged by {n} notifications");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // This hub is read-only: any other inbound frame is ignored.
                    _ => continue,
                }
            }
        }
    }
}
