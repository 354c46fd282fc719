//! Benchmarker sessions.
//!
//! Every websocket connection to `/connect` is one worker session, addressed
//! `benchmarker-<uuid>`. Frames the worker sends become dispatch commands;
//! replies and jobs share the session's outbound queue. When the socket goes
//! away the in-flight job, if any, is recovered and the worker is dropped
//! from the pool.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::ApiState;
use crate::protocol::{ServerMessage, WorkerMessage};

pub const ADDRESS_PREFIX: &str = "benchmarker-";

pub async fn connect_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

async fn handle_session(socket: WebSocket, state: ApiState) {
    let address = format!("{}{}", ADDRESS_PREFIX, Uuid::new_v4().simple());
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.worker_channel_capacity.max(1));

    state.transport.open_session(&address, tx.clone()).await;
    tracing::info!(address = %address, "Worker connected");

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_frame(&state, &address, text.as_str()).await {
                        if tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(address = %address, error = %e, "Websocket error");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    state.transport.close_session(&address).await;
    writer.abort();

    match state.handle.connection_lost(&address).await {
        Ok(Some(job)) => {
            tracing::debug!(address = %address, job = %job, "Recovered job of closed session");
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(address = %address, error = %e, "Failed to report lost connection"),
    }
    if let Err(e) = state.handle.unregister_worker(&address).await {
        tracing::warn!(address = %address, error = %e, "Failed to unregister worker");
    }
    tracing::info!(address = %address, "Worker disconnected");
}

/// Apply one worker frame. Returns the reply to send back, if any.
async fn handle_frame(state: &ApiState, address: &str, text: &str) -> Option<ServerMessage> {
    let message: WorkerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(address = %address, error = %e, "Malformed frame");
            return Some(ServerMessage::Error {
                message: format!("Malformed frame: {}", e),
            });
        }
    };

    let outcome = match message {
        WorkerMessage::Register { environment } => state
            .handle
            .register_worker(address, environment)
            .await
            .map(|accepted| Some(ServerMessage::Registered { accepted })),
        WorkerMessage::Unregister => state
            .handle
            .unregister_worker(address)
            .await
            .map(|removed| Some(ServerMessage::Unregistered { removed })),
        WorkerMessage::Result { result } => state
            .handle
            .result_received(address, result)
            .await
            .map(|()| None),
    };

    outcome.unwrap_or_else(|e| {
        Some(ServerMessage::Error {
            message: e.to_string(),
        })
    })
}
