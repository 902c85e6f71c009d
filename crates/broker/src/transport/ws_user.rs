// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber-facing WebSocket endpoints: fleet overview, probe list,
//! live metrics, container log tails, and interactive shells.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::protocol::{Frame, TYPE_LOGS_STREAM, TYPE_LOGS_STREAM_END};
use crate::subscription::{ListKind, Outbox, Scope};
use crate::transport::auth;

/// Query parameters for subscriber sockets.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberQuery {
    pub token: Option<String>,
}

/// Query parameters for the log-tail socket.
#[derive(Debug, Clone, Deserialize)]
pub struct LogStreamQuery {
    pub token: Option<String>,
    pub container: String,
}

async fn send_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}

async fn forward_to_agent(
    broker: &Broker,
    server_id: u64,
    frame: Frame,
) -> Result<(), BrokerError> {
    match broker.registry.lookup(server_id).await {
        Some(conn) => conn.write(frame),
        None => Err(BrokerError::AgentNotConnected),
    }
}

// -- List subscriptions -------------------------------------------------------

/// `GET /ws/servers` — fleet overview subscription.
pub async fn server_list_ws(
    State(broker): State<Arc<Broker>>,
    Query(query): Query<SubscriberQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let scope = auth::subscriber_scope(query.token.as_deref(), broker.config.auth_token.as_deref());
    ws.on_upgrade(move |socket| handle_list(broker, socket, ListKind::Servers, scope))
}

/// `GET /ws/probes` — life-probe list subscription.
pub async fn probe_list_ws(
    State(broker): State<Arc<Broker>>,
    Query(query): Query<SubscriberQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let scope = auth::subscriber_scope(query.token.as_deref(), broker.config.auth_token.as_deref());
    ws.on_upgrade(move |socket| handle_list(broker, socket, ListKind::Probes, scope))
}

async fn handle_list(broker: Arc<Broker>, socket: WebSocket, kind: ListKind, scope: Scope) {
    let (id, mut rx) = broker.subscriptions.subscribe_list(kind, scope).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Initial snapshot so a subscriber never waits for the first change.
    let snapshot = match kind {
        ListKind::Servers => broker.server_list_frame(scope).await,
        ListKind::Probes => broker.probe_list_frame(scope).await,
    };
    if !send_frame(&mut ws_tx, &snapshot).await {
        broker.subscriptions.unsubscribe_list(kind, scope, id).await;
        return;
    }

    loop {
        tokio::select! {
            _ = broker.shutdown.cancelled() => break,

            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if !send_frame(&mut ws_tx, &frame).await {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    broker.subscriptions.unsubscribe_list(kind, scope, id).await;
    let _ = ws_tx.close().await;
}

// -- Live metrics -------------------------------------------------------------

/// `GET /ws/servers/{id}/metrics` — live metric subscription.  Samples are
/// rate-limited upstream; lifecycle frames arrive unthrottled.
pub async fn metrics_ws(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_metrics(broker, socket, server_id))
}

async fn handle_metrics(broker: Arc<Broker>, socket: WebSocket, server_id: u64) {
    let (id, mut rx) = broker.subscriptions.subscribe_metrics(server_id).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = broker.shutdown.cancelled() => break,

            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if !send_frame(&mut ws_tx, &frame).await {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    broker.subscriptions.unsubscribe_metrics(server_id, id).await;
    let _ = ws_tx.close().await;
}

// -- Container log tails ------------------------------------------------------

/// `GET /ws/servers/{id}/docker/logs?container=…` — start a log tail on
/// the agent and relay its chunks until the stream ends or the subscriber
/// leaves.
pub async fn docker_logs_ws(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Query(query): Query<LogStreamQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Err(err) =
        auth::validate_ws_token(query.token.as_deref(), broker.config.auth_token.as_deref())
    {
        return err.into_response();
    }
    if broker.registry.lookup(server_id).await.is_none() {
        return BrokerError::AgentNotConnected.into_response();
    }

    let container = query.container.clone();
    ws.on_upgrade(move |socket| handle_log_stream(broker, socket, server_id, container))
        .into_response()
}

async fn handle_log_stream(
    broker: Arc<Broker>,
    socket: WebSocket,
    server_id: u64,
    container: String,
) {
    let stream_id = uuid::Uuid::new_v4().simple().to_string();
    let (outbox, mut rx) = Outbox::channel(broker.config.listener_queue);
    broker.subscriptions.register_stream(&stream_id, server_id, outbox).await;

    let mut start = Frame::new(TYPE_LOGS_STREAM);
    start.stream_id = Some(stream_id.clone());
    start.payload = Some(serde_json::json!({ "container": container }));
    if forward_to_agent(&broker, server_id, start).await.is_err() {
        broker.subscriptions.remove_stream(&stream_id).await;
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = broker.shutdown.cancelled() => break,

            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        let end = frame.kind == TYPE_LOGS_STREAM_END;
                        if !send_frame(&mut ws_tx, &frame).await || end {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    // Subscriber left before the stream ended: tell the agent to stop.
    if broker.subscriptions.remove_stream(&stream_id).await {
        let mut stop = Frame::new(TYPE_LOGS_STREAM);
        stop.stream_id = Some(stream_id.clone());
        stop.payload = Some(serde_json::json!({ "action": "stop" }));
        if forward_to_agent(&broker, server_id, stop).await.is_err() {
            tracing::debug!(server_id, stream_id = %stream_id, "stop frame undeliverable");
        }
    }
    let _ = ws_tx.close().await;
}

// -- Interactive shells -------------------------------------------------------

/// `GET /ws/servers/{id}/shell` — shell owner endpoint.  Owner frames
/// (`create`, `input`, `resize`, `close`) are forwarded to the agent
/// verbatim; agent frames come back through the shell bridge by session.
pub async fn shell_ws(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Query(query): Query<SubscriberQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Err(err) =
        auth::validate_ws_token(query.token.as_deref(), broker.config.auth_token.as_deref())
    {
        return err.into_response();
    }
    ws.on_upgrade(move |socket| handle_shell(broker, socket, server_id)).into_response()
}

async fn handle_shell(broker: Arc<Broker>, socket: WebSocket, server_id: u64) {
    let (outbox, mut rx) = Outbox::channel(broker.config.listener_queue);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut owned: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            _ = broker.shutdown.cancelled() => break,

            // Agent -> owner, via the bridge.
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if !send_frame(&mut ws_tx, &frame).await {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Owner -> agent.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<Frame>(&text) else {
                            continue;
                        };
                        if !handle_owner_frame(&broker, server_id, frame, &outbox, &mut owned, &mut ws_tx)
                            .await
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    // Owner gone: close its sessions and tell the agent.
    for session_id in owned {
        if broker.shell.close(&session_id).await.is_some() {
            let mut close = Frame::new("close");
            close.session = Some(session_id);
            let _ = forward_to_agent(&broker, server_id, close).await;
        }
    }
    let _ = ws_tx.close().await;
}

/// Process one owner frame.  Returns `false` when the socket should close.
async fn handle_owner_frame(
    broker: &Arc<Broker>,
    server_id: u64,
    mut frame: Frame,
    outbox: &Outbox,
    owned: &mut Vec<String>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
) -> bool {
    match frame.kind.as_str() {
        "create" => {
            let session_id = frame
                .session
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
            frame.session = Some(session_id.clone());
            broker.shell.open(&session_id, server_id, outbox.clone()).await;
            owned.push(session_id.clone());
            if let Err(err) = forward_to_agent(broker, server_id, frame).await {
                broker.shell.close(&session_id).await;
                owned.retain(|s| s != &session_id);
                return send_frame(ws_tx, &Frame::shell_error(&session_id, &err.message())).await;
            }
            true
        }
        "input" | "resize" => {
            let Some(session_id) = frame.session.clone() else {
                return true;
            };
            if !owned.contains(&session_id) {
                return true;
            }
            if let Err(err) = forward_to_agent(broker, server_id, frame).await {
                return send_frame(ws_tx, &Frame::shell_error(&session_id, &err.message())).await;
            }
            true
        }
        "close" => {
            let Some(session_id) = frame.session.clone() else {
                return true;
            };
            if !owned.contains(&session_id) {
                return true;
            }
            owned.retain(|s| s != &session_id);
            broker.shell.close(&session_id).await;
            let _ = forward_to_agent(broker, server_id, frame).await;
            true
        }
        _ => true,
    }
}
