// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the broker.

pub mod auth;
pub mod http;
pub mod ws_agent;
pub mod ws_user;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::broker::Broker;

/// Build the axum `Router` with all broker routes.
pub fn build_router(broker: Arc<Broker>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Fleet
        .route("/api/v1/servers", get(http::server_list))
        // Processes
        .route("/api/v1/servers/{id}/processes", get(http::process_list))
        .route("/api/v1/servers/{id}/processes/kill", post(http::process_kill))
        // Files
        .route("/api/v1/servers/{id}/files", get(http::file_list))
        .route("/api/v1/servers/{id}/files/content", get(http::file_content))
        .route("/api/v1/servers/{id}/files/upload", post(http::file_upload))
        // Docker
        .route("/api/v1/servers/{id}/docker", post(http::docker_command))
        .route("/api/v1/servers/{id}/docker/containers", get(http::docker_containers))
        .route("/api/v1/servers/{id}/docker/images", get(http::docker_images))
        .route("/api/v1/servers/{id}/docker/composes", get(http::docker_composes))
        .route(
            "/api/v1/servers/{id}/docker/containers/{name}/logs",
            get(http::docker_container_logs),
        )
        .route("/api/v1/servers/{id}/docker/composes/config", get(http::docker_compose_config))
        .route("/api/v1/servers/{id}/docker/files", get(http::docker_file_list))
        .route("/api/v1/servers/{id}/docker/files/content", get(http::docker_file_content))
        .route("/api/v1/servers/{id}/docker/files/tree", get(http::docker_file_tree))
        .route("/api/v1/servers/{id}/docker/files/upload", post(http::docker_file_upload))
        // Nginx and upgrades
        .route("/api/v1/servers/{id}/nginx", post(http::nginx_command))
        .route("/api/v1/servers/{id}/upgrade", post(http::agent_upgrade))
        // Metric ingestion (server-secret auth)
        .route("/servers/{id}/monitor", post(http::monitor_ingest))
        // Agent socket (server-secret auth)
        .route("/agent/ws", get(ws_agent::agent_ws_handler))
        // Subscriber sockets (scope decided per-handler)
        .route("/ws/servers", get(ws_user::server_list_ws))
        .route("/ws/probes", get(ws_user::probe_list_ws))
        .route("/ws/servers/{id}/metrics", get(ws_user::metrics_ws))
        .route("/ws/servers/{id}/docker/logs", get(ws_user::docker_logs_ws))
        .route("/ws/servers/{id}/shell", get(ws_user::shell_ws))
        // Middleware
        .layer(middleware::from_fn_with_state(broker.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(broker)
}
