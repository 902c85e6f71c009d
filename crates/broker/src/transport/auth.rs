// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::subscription::Scope;

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), BrokerError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(BrokerError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(BrokerError::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(BrokerError::Unauthorized)
    }
}

/// Validate a token from a WebSocket query parameter.
pub fn validate_ws_token(token: Option<&str>, expected: Option<&str>) -> Result<(), BrokerError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };
    match token {
        Some(t) if constant_time_eq(t, expected) => Ok(()),
        _ => Err(BrokerError::Unauthorized),
    }
}

/// Authorization scope for a subscriber socket: authenticated when the
/// token matches, public otherwise.  With auth disabled every subscriber
/// is authenticated.
pub fn subscriber_scope(token: Option<&str>, expected: Option<&str>) -> Scope {
    match validate_ws_token(token, expected) {
        Ok(()) => Scope::Authenticated,
        Err(_) => Scope::Public,
    }
}

/// Validate the shared server secret presented by an agent or the metric
/// ingestion endpoint.
pub fn validate_server_secret(
    broker: &Broker,
    server_id: u64,
    presented: Option<&str>,
) -> Result<(), BrokerError> {
    let expected = broker.servers.secret(server_id).ok_or(BrokerError::NotFound)?;
    match presented {
        Some(secret) if constant_time_eq(secret, &expected) => Ok(()),
        _ => Err(BrokerError::Unauthorized),
    }
}

/// Axum middleware that enforces Bearer token authentication.
///
/// Exempt: health, the agent socket and metric ingestion (server-secret
/// auth), and subscriber sockets (scope decided per-handler from the query
/// token).
pub async fn auth_layer(
    state: State<Arc<Broker>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();

    if path == "/api/v1/health"
        || path == "/agent/ws"
        || path.starts_with("/ws/")
        || (path.starts_with("/servers/") && path.ends_with("/monitor"))
    {
        return next.run(req).await;
    }

    if let Err(err) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        return err.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
