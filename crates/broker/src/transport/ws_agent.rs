// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-facing WebSocket endpoint.
//!
//! The socket task is the exclusive owner of the connection's read side
//! and the drain point of its outbound queue, so every producer in the
//! broker shares one serialized writer.  Keep-alive is one-sided: the
//! broker pings on an interval and arms a read deadline that any inbound
//! frame or pong resets; a missed deadline is treated as a disconnect.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::conn::AgentConnection;
use crate::error::BrokerError;
use crate::protocol::Frame;
use crate::router::route_frame;
use crate::transport::auth;

/// `GET /agent/ws` — WebSocket upgrade for a managed host's agent.
///
/// The agent presents its server ID and shared secret as headers; a
/// mismatch is rejected before the upgrade completes.
pub async fn agent_ws_handler(
    State(broker): State<Arc<Broker>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let server_id = match headers
        .get("x-server-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        Some(id) => id,
        None => {
            return BrokerError::BadRequest("missing or invalid X-Server-Id".to_owned())
                .into_response();
        }
    };

    let secret = headers.get("x-server-secret").and_then(|v| v.to_str().ok());
    if let Err(err) = auth::validate_server_secret(&broker, server_id, secret) {
        tracing::warn!(server_id, "agent connect rejected: {}", err.code());
        return err.into_response();
    }

    ws.on_upgrade(move |socket| handle_agent(broker, socket, server_id)).into_response()
}

/// Socket task for one agent connection: read loop, outbound drain, and
/// keep-alive, followed by the teardown sequence.
async fn handle_agent(broker: Arc<Broker>, socket: WebSocket, server_id: u64) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let conn = Arc::new(AgentConnection::new(server_id, outbound_tx));
    broker.register_agent(Arc::clone(&conn)).await;

    let closed = conn.closed_token();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut ping = tokio::time::interval(broker.config.ping_interval());
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut read_deadline = tokio::time::Instant::now() + broker.config.read_deadline();

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            _ = broker.shutdown.cancelled() => break,

            _ = tokio::time::sleep_until(read_deadline) => {
                tracing::warn!(server_id, "agent keep-alive deadline elapsed");
                break;
            }

            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }

            // Broker -> agent
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        let Ok(json) = serde_json::to_string(&frame) else {
                            tracing::debug!(server_id, kind = %frame.kind, "unserializable frame skipped");
                            continue;
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Agent -> broker
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        read_deadline = tokio::time::Instant::now() + broker.config.read_deadline();
                        match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => route_frame(&broker, server_id, frame).await,
                            Err(e) => {
                                tracing::debug!(server_id, err = %e, "unparseable frame discarded");
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                        read_deadline = tokio::time::Instant::now() + broker.config.read_deadline();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(server_id, err = %e, "agent socket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    conn.close();
    broker.drop_agent(server_id, conn.conn_id).await;
}
