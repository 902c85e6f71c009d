// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error taxonomy for the broker core and its HTTP surface.
///
/// Each variant maps to a stable machine-readable code and an HTTP status.
/// The core never retries; errors surface to the caller unchanged, and
/// agent-supplied messages are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound,
    /// No current connection for the server.
    AgentNotConnected,
    /// The connection dropped while the request was in flight.
    AgentDisconnected,
    /// Write failed or the transport is gone.
    TransportClosed,
    /// Deadline elapsed with no reply.
    RequestTimeout,
    /// Reply parsed, but the validator rejected it.  Carries the
    /// agent-supplied message.
    Agent(String),
    /// Reply could not be interpreted.
    InvalidResponse(String),
    Internal(String),
}

impl BrokerError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::AgentNotConnected | Self::AgentDisconnected | Self::TransportClosed => 503,
            Self::RequestTimeout => 504,
            Self::Agent(_) | Self::InvalidResponse(_) | Self::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::AgentNotConnected => "AGENT_NOT_CONNECTED",
            Self::AgentDisconnected => "AGENT_DISCONNECTED",
            Self::TransportClosed => "TRANSPORT_CLOSED",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::Agent(_) => "AGENT_ERROR",
            Self::InvalidResponse(_) => "INVALID_RESPONSE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Human-readable message for the error envelope.
    pub fn message(&self) -> String {
        match self {
            Self::BadRequest(m) | Self::Agent(m) | Self::InvalidResponse(m) | Self::Internal(m) => {
                m.clone()
            }
            Self::Unauthorized => "unauthorized".to_owned(),
            Self::Forbidden => "forbidden".to_owned(),
            Self::NotFound => "not found".to_owned(),
            Self::AgentNotConnected => "agent not connected".to_owned(),
            Self::AgentDisconnected => "agent disconnected".to_owned(),
            Self::TransportClosed => "transport closed".to_owned(),
            Self::RequestTimeout => "request timed out".to_owned(),
        }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: ErrorBody { code: self.code().to_owned(), message: self.message() },
        };
        (status, Json(body))
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for BrokerError {}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        self.to_http_response().into_response()
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
