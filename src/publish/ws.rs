//! WebSocket subscription endpoint for published results.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::hub::{Envelope, PublishHub};

/// Build the router exposing `GET /ws/{sender_id}`.
pub fn subscribe_routes(hub: Arc<PublishHub>) -> Router {
    Router::new()
        .route("/ws/{topic}", get(ws_handler))
        .with_state(hub)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(topic): Path<String>,
    State(hub): State<Arc<PublishHub>>,
) -> impl IntoResponse {
    info!(topic = %topic, "Subscriber connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, hub, topic))
}

async fn handle_socket(mut socket: WebSocket, hub: Arc<PublishHub>, topic: String) {
    let mut sub = hub.subscribe(&topic).await;
    let mut delivered = 0;

    let backlog = std::mem::take(&mut sub.backlog);
    if !deliver_all(&mut socket, &hub, &topic, backlog, &mut delivered).await {
        warn!(topic = %topic, "Subscriber left during replay, remaining payloads kept");
        hub.close(sub).await;
        return;
    }

    loop {
        tokio::select! {
            result = sub.live.recv() => {
                match result {
                    Ok(envelope) => {
                        if !deliver(&mut socket, &hub, &topic, envelope, &mut delivered).await {
                            debug!(topic = %topic, "Subscriber disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(topic = %topic, missed = n, "Subscriber lagged behind topic, replaying");
                        let missed = hub.pending_after(&topic, delivered).await;
                        if !deliver_all(&mut socket, &hub, &topic, missed, &mut delivered).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(topic = %topic, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    hub.close(sub).await;
    info!(topic = %topic, "Subscriber disconnected");
}

/// Send one payload and acknowledge it. Payloads at or below `delivered`
/// were already sent on this socket and are skipped.
async fn deliver(
    socket: &mut WebSocket,
    hub: &PublishHub,
    topic: &str,
    envelope: Envelope,
    delivered: &mut u64,
) -> bool {
    if envelope.seq <= *delivered {
        return true;
    }
    if socket.send(Message::Text(envelope.payload.into())).await.is_err() {
        return false;
    }
    *delivered = envelope.seq;
    hub.ack(topic, envelope.seq).await;
    true
}

async fn deliver_all(
    socket: &mut WebSocket,
    hub: &PublishHub,
    topic: &str,
    envelopes: Vec<Envelope>,
    delivered: &mut u64,
) -> bool {
    for envelope in envelopes {
        if !deliver(socket, hub, topic, envelope, delivered).await {
            return false;
        }
    }
    true
}
