//! Event stream endpoints.
//!
//! Two transports over the same notification hub: a chunked HTTP stream
//! of newline-delimited JSON and a WebSocket. Both subscribe on connect,
//! emit a heartbeat when no event arrives within the interval, and
//! unsubscribe when the connection goes away (the queue handle does that
//! on Drop, whichever way the task ends).

use axum::body::{Body, Bytes};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::debug;

use netloom_shared::TopologyEvent;

use crate::notify::NotificationQueue;
use crate::state::AppState;

/// Idle interval after which a heartbeat is emitted.
const HEARTBEAT: Duration = Duration::from_secs(5);

fn event_line(event: &TopologyEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}

/// `GET /v1/notifications`: one JSON object per line. Heartbeat expiries
/// emit nothing; the connection simply stays open until the client goes
/// away, which drops the stream and with it the subscription.
pub async fn http_stream(State(state): State<AppState>) -> Response {
    let queue = state.controller.hub().subscribe();
    let stream = stream::unfold(queue, |queue| async move {
        loop {
            if let Some(line) = queue.recv(HEARTBEAT).await.as_ref().and_then(event_line) {
                return Some((Ok::<_, Infallible>(Bytes::from(line + "\n")), queue));
            }
        }
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// `GET /v1/notifications/ws`: the same events over a WebSocket, with
/// protocol-level pings as the heartbeat.
pub async fn websocket(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let queue = state.controller.hub().subscribe();
    upgrade.on_upgrade(move |socket| serve_socket(socket, queue))
}

async fn serve_socket(mut socket: WebSocket, queue: NotificationQueue) {
    loop {
        tokio::select! {
            received = queue.recv(HEARTBEAT) => {
                let message = match received.as_ref().and_then(event_line) {
                    Some(line) => Message::Text(line.into()),
                    None => Message::Ping(Bytes::new()),
                };
                if socket.send(message).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    // Pongs and any client chatter are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("notification websocket closed");
}
