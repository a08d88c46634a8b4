// src/api/ws.rs
// WebSocket subscriptions: one channel-backed subscriber per socket

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};

use super::error::ApiResult;
use crate::events::{Broadcaster, ChannelSubscriber, Subscriber};
use crate::state::AppState;

/// GET /em/subscribe/{topic}/{key}
pub async fn subscribe_topic(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((topic, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    state.access.check_key(&topic, &key).await?;
    let hub = state.topic_hub.clone();
    Ok(ws.on_upgrade(move |socket| serve_subscription(socket, hub, topic)))
}

/// GET /api/push/subscribe/{device_id}
pub async fn subscribe_device(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Response {
    let hub = state.device_hub.clone();
    ws.on_upgrade(move |socket| serve_subscription(socket, hub, device_id))
}

/// Register the socket under `key` until either side closes.
///
/// Inbound frames are drained and ignored; the socket only carries pushes.
async fn serve_subscription(socket: WebSocket, hub: Arc<Broadcaster<String>>, key: String) {
    let (sender, receiver) = socket.split();
    pump(sender, receiver, hub, key).await;
}

async fn pump<W, R, E>(mut sender: W, mut receiver: R, hub: Arc<Broadcaster<String>>, key: String)
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let (subscriber, mut outbox) = ChannelSubscriber::channel();
    let connection = subscriber.id();

    hub.subscribe(key.clone(), subscriber).await;
    info!(key = %key, connection = %connection, "Subscriber connected");

    let mut writer = tokio::spawn(async move {
        while let Some(payload) = outbox.recv().await {
            if let Err(e) = sender.send(Message::Text(payload.to_string().into())).await {
                debug!(connection = %connection, "Socket write failed: {}", e);
                break;
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.unsubscribe(&key, connection).await;
    info!(key = %key, connection = %connection, "Subscriber disconnected");
}
