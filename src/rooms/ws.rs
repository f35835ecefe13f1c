use std::{fmt::Display, future, time::Duration};

use axum::{debug_handler, extract::{ws::{Message as WsMessage, WebSocket}, Path, State, WebSocketUpgrade}, response::{IntoResponse, Response}};
use futures_util::{Sink, SinkExt, StreamExt};

use crate::{hub::{validate_room_id, Identity, Outbox}, AppResult, AppState};

#[debug_handler(state = AppState)]
pub async fn room_ws(
    Path(room_id): Path<String>,
    State(app_state): State<AppState>,
    identity: Identity,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let room_id = validate_room_id(&room_id)?.to_owned();

    tracing::info!(room = %room_id, user_id = %identity.user_id, "WebSocket upgrade");

    Ok(ws.on_upgrade(async move |stream: WebSocket| {
        serve_socket(app_state, room_id, identity, stream).await;
    }).into_response())
}

async fn serve_socket(app_state: AppState, room_id: String, identity: Identity, stream: WebSocket) {
    let (sender, receiver) = stream.split();
    let (connection, outbox) = app_state.hub.connect(identity);

    let writer = tokio::spawn(write_outbox(outbox, sender, app_state.write_timeout));

    // Ping/pong is handled by axum; a close frame or a read error ends the session
    let inbound = receiver
        .take_while(|frame| future::ready(matches!(frame, Ok(msg) if !matches!(msg, WsMessage::Close(_)))))
        .filter_map(|frame| future::ready(match frame {
            Ok(WsMessage::Text(text)) => Some(text.as_str().to_owned()),
            Ok(WsMessage::Binary(bytes)) => String::from_utf8(bytes.to_vec()).ok(),
            _ => None,
        }));

    if let Err(err) = app_state.hub.serve(&room_id, connection.clone(), inbound).await {
        tracing::warn!(room = %room_id, error = %err, "Session failed");
    }

    connection.close();
    if let Err(err) = writer.await {
        tracing::debug!(room = %room_id, error = %err, "Writer task ended abnormally");
    }
}

async fn write_outbox<S>(mut outbox: Outbox, mut sender: S, write_timeout: Duration)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    while let Some(payload) = outbox.recv().await {
        match tokio::time::timeout(write_timeout, sender.send(WsMessage::Text(payload.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "WebSocket write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(timeout_secs = write_timeout.as_secs(), "WebSocket write stalled, dropping client");
                break;
            }
        }
    }

    // Makes any further delivery fail so the room drops this member
    outbox.close();
    let _ = tokio::time::timeout(write_timeout, sender.send(WsMessage::Close(None))).await;
}
