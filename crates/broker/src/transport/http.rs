// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator REST handlers.  Every operation endpoint is thin glue over
//! [`Broker::send_and_wait`]: build the payload, dispatch with the right
//! timeout class, return the validated reply.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::broker::Broker;
use crate::dispatch::{FILE_TIMEOUT, LONG_TIMEOUT, PROBE_TIMEOUT, QUERY_TIMEOUT};
use crate::error::BrokerError;
use crate::pathsafe;
use crate::subscription::Scope;
use crate::transport::auth;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub connected_agents: usize,
    pub pending_requests: usize,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
    #[serde(default)]
    pub base: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KillRequest {
    pub pid: i64,
    #[serde(default)]
    pub signal: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub path: String,
    /// File bytes, base64-encoded.
    pub content: String,
    #[serde(default)]
    pub base: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DockerCommandRequest {
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    #[serde(default)]
    pub tail: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct NginxRequest {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
pub struct DockerFileQuery {
    pub container: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct DockerFileUploadRequest {
    pub container: String,
    pub path: String,
    pub content: String,
}

// -- Helpers ------------------------------------------------------------------

/// Dispatch an operation and unwrap its `data` payload.
async fn dispatch(
    broker: &Broker,
    server_id: u64,
    op: &str,
    payload: Value,
    timeout: std::time::Duration,
) -> Result<Json<Value>, BrokerError> {
    let frame = broker.send_and_wait(server_id, op, payload, timeout).await?;
    match frame.data {
        Some(data) => Ok(Json(data)),
        // Some replies (nginx_success, plain acks) carry no data payload.
        None => Ok(Json(serde_json::to_value(&frame).unwrap_or(Value::Null))),
    }
}

/// Like [`dispatch`], for read operations whose reply must carry `data`.
async fn dispatch_expect_data(
    broker: &Broker,
    server_id: u64,
    op: &str,
    payload: Value,
    timeout: std::time::Duration,
) -> Result<Json<Value>, BrokerError> {
    let frame = broker.send_and_wait(server_id, op, payload, timeout).await?;
    frame
        .data
        .map(Json)
        .ok_or_else(|| BrokerError::InvalidResponse(format!("{op} reply carried no data")))
}

fn checked_path(broker: &Broker, path: &str, base: Option<&str>) -> Result<String, BrokerError> {
    let normalized = match base {
        Some(base) => pathsafe::validate_within(base, path, &broker.config.denied_paths)?,
        None => pathsafe::validate(path, &broker.config.denied_paths)?,
    };
    Ok(normalized.display().to_string())
}

// -- Health and fleet ---------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(broker): State<Arc<Broker>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        connected_agents: broker.registry.connected_ids().await.len(),
        pending_requests: broker.pending.len().await,
    })
}

/// `GET /api/v1/servers` — unmasked fleet snapshot for operators.
pub async fn server_list(State(broker): State<Arc<Broker>>) -> impl IntoResponse {
    let frame = broker.server_list_frame(Scope::Authenticated).await;
    Json(serde_json::to_value(&frame).unwrap_or(Value::Null))
}

// -- Processes ----------------------------------------------------------------

/// `GET /api/v1/servers/{id}/processes`
pub async fn process_list(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
) -> Result<Json<Value>, BrokerError> {
    dispatch_expect_data(&broker, server_id, "process_list", json!({}), PROBE_TIMEOUT).await
}

/// `POST /api/v1/servers/{id}/processes/kill`
pub async fn process_kill(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Json(req): Json<KillRequest>,
) -> Result<Json<Value>, BrokerError> {
    let payload = json!({ "pid": req.pid, "signal": req.signal });
    dispatch(&broker, server_id, "process_kill", payload, PROBE_TIMEOUT).await
}

// -- Files --------------------------------------------------------------------

/// `GET /api/v1/servers/{id}/files?path=…`
pub async fn file_list(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, BrokerError> {
    let path = checked_path(&broker, &query.path, query.base.as_deref())?;
    dispatch_expect_data(&broker, server_id, "file_list", json!({ "path": path }), FILE_TIMEOUT).await
}

/// `GET /api/v1/servers/{id}/files/content?path=…`
pub async fn file_content(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, BrokerError> {
    let path = checked_path(&broker, &query.path, query.base.as_deref())?;
    dispatch_expect_data(&broker, server_id, "file_content", json!({ "path": path }), FILE_TIMEOUT).await
}

/// `POST /api/v1/servers/{id}/files/upload`
pub async fn file_upload(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<Value>, BrokerError> {
    let path = checked_path(&broker, &req.path, req.base.as_deref())?;
    // Reject undecodable content here; the agent receives it as-is.
    base64::engine::general_purpose::STANDARD
        .decode(&req.content)
        .map_err(|_| BrokerError::BadRequest("content is not valid base64".to_owned()))?;
    let payload = json!({ "path": path, "content": req.content });
    dispatch(&broker, server_id, "file_upload", payload, FILE_TIMEOUT).await
}

// -- Docker -------------------------------------------------------------------

/// `POST /api/v1/servers/{id}/docker`
pub async fn docker_command(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Json(req): Json<DockerCommandRequest>,
) -> Result<Json<Value>, BrokerError> {
    let payload = json!({ "command": req.command, "args": req.args });
    dispatch(&broker, server_id, "docker_command", payload, LONG_TIMEOUT).await
}

/// `GET /api/v1/servers/{id}/docker/containers`
pub async fn docker_containers(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
) -> Result<Json<Value>, BrokerError> {
    dispatch_expect_data(&broker, server_id, "docker_containers", json!({}), QUERY_TIMEOUT).await
}

/// `GET /api/v1/servers/{id}/docker/images`
pub async fn docker_images(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
) -> Result<Json<Value>, BrokerError> {
    dispatch_expect_data(&broker, server_id, "docker_images", json!({}), QUERY_TIMEOUT).await
}

/// `GET /api/v1/servers/{id}/docker/composes`
pub async fn docker_composes(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
) -> Result<Json<Value>, BrokerError> {
    dispatch_expect_data(&broker, server_id, "docker_composes", json!({}), QUERY_TIMEOUT).await
}

/// `GET /api/v1/servers/{id}/docker/containers/{name}/logs`
pub async fn docker_container_logs(
    State(broker): State<Arc<Broker>>,
    Path((server_id, name)): Path<(u64, String)>,
    Query(query): Query<TailQuery>,
) -> Result<Json<Value>, BrokerError> {
    let payload = json!({ "container": name, "tail": query.tail.unwrap_or(200) });
    dispatch_expect_data(&broker, server_id, "docker_container_logs", payload, QUERY_TIMEOUT).await
}

/// `GET /api/v1/servers/{id}/docker/composes/config?path=…`
pub async fn docker_compose_config(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Value>, BrokerError> {
    let path = checked_path(&broker, &query.path, query.base.as_deref())?;
    dispatch_expect_data(&broker, server_id, "docker_compose_config", json!({ "path": path }), QUERY_TIMEOUT)
        .await
}

/// `GET /api/v1/servers/{id}/docker/files?container=…&path=…`
pub async fn docker_file_list(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Query(query): Query<DockerFileQuery>,
) -> Result<Json<Value>, BrokerError> {
    let path = checked_path(&broker, &query.path, None)?;
    let payload = json!({ "container": query.container, "path": path });
    dispatch_expect_data(&broker, server_id, "docker_file_list", payload, FILE_TIMEOUT).await
}

/// `GET /api/v1/servers/{id}/docker/files/content?container=…&path=…`
pub async fn docker_file_content(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Query(query): Query<DockerFileQuery>,
) -> Result<Json<Value>, BrokerError> {
    let path = checked_path(&broker, &query.path, None)?;
    let payload = json!({ "container": query.container, "path": path });
    dispatch_expect_data(&broker, server_id, "docker_file_content", payload, FILE_TIMEOUT).await
}

/// `GET /api/v1/servers/{id}/docker/files/tree?container=…&path=…`
pub async fn docker_file_tree(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Query(query): Query<DockerFileQuery>,
) -> Result<Json<Value>, BrokerError> {
    let path = checked_path(&broker, &query.path, None)?;
    let payload = json!({ "container": query.container, "path": path });
    dispatch_expect_data(&broker, server_id, "docker_file_tree", payload, FILE_TIMEOUT).await
}

/// `POST /api/v1/servers/{id}/docker/files/upload`
pub async fn docker_file_upload(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Json(req): Json<DockerFileUploadRequest>,
) -> Result<Json<Value>, BrokerError> {
    let path = checked_path(&broker, &req.path, None)?;
    base64::engine::general_purpose::STANDARD
        .decode(&req.content)
        .map_err(|_| BrokerError::BadRequest("content is not valid base64".to_owned()))?;
    let payload = json!({ "container": req.container, "path": path, "content": req.content });
    dispatch(&broker, server_id, "docker_file_upload", payload, FILE_TIMEOUT).await
}

// -- Nginx and upgrades -------------------------------------------------------

/// `POST /api/v1/servers/{id}/nginx`
pub async fn nginx_command(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Json(req): Json<NginxRequest>,
) -> Result<Json<Value>, BrokerError> {
    let payload = json!({ "command": req.command, "payload": req.payload });
    dispatch(&broker, server_id, "nginx_command", payload, QUERY_TIMEOUT).await
}

/// `POST /api/v1/servers/{id}/upgrade` — ask the agent to upgrade itself.
/// Progress arrives as `agent_upgrade_status` pushes on the metric socket.
pub async fn agent_upgrade(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, BrokerError> {
    dispatch(&broker, server_id, "agent_upgrade", payload, LONG_TIMEOUT).await
}

// -- Metric ingestion ---------------------------------------------------------

/// `POST /servers/{id}/monitor` — HTTP alternative to the WS `monitor`
/// frame, authenticated by the server's shared secret.
pub async fn monitor_ingest(
    State(broker): State<Arc<Broker>>,
    Path(server_id): Path<u64>,
    headers: HeaderMap,
    Json(sample): Json<Value>,
) -> Result<Json<Value>, BrokerError> {
    let secret = headers.get("x-server-secret").and_then(|v| v.to_str().ok());
    auth::validate_server_secret(&broker, server_id, secret)?;
    if !sample.is_object() {
        return Err(BrokerError::BadRequest("sample must be a JSON object".to_owned()));
    }
    broker.ingest_metric(server_id, sample).await;
    Ok(Json(json!({ "accepted": true })))
}
