// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent wire protocol: one self-delimited JSON object per WebSocket text
//! message.
//!
//! The agent dialect is loose — every field except `type` is optional, and
//! replies may carry extra vendor fields.  Frames are therefore modeled as a
//! single struct with optional fields plus a lossless `extra` map, so frames
//! relayed to shell owners and stream subscribers arrive unmodified.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// -- Frame type names ---------------------------------------------------------

pub const TYPE_ERROR: &str = "error";
pub const TYPE_DOCKER_ERROR: &str = "docker_error";
pub const TYPE_MONITOR: &str = "monitor";
pub const TYPE_SYSTEM_INFO: &str = "system_info";
pub const TYPE_SHELL_RESPONSE: &str = "shell_response";
pub const TYPE_SHELL_CLOSE: &str = "shell_close";
pub const TYPE_SHELL_ERROR: &str = "shell_error";
pub const TYPE_WORKING_DIRECTORY: &str = "working_directory";
pub const TYPE_LOGS_STREAM: &str = "docker_logs_stream";
pub const TYPE_LOGS_STREAM_DATA: &str = "docker_logs_stream_data";
pub const TYPE_LOGS_STREAM_END: &str = "docker_logs_stream_end";
pub const TYPE_UPGRADE_STATUS: &str = "agent_upgrade_status";
pub const TYPE_LIFE_PROBE_RESULT: &str = "life_probe_result";
pub const TYPE_AGENT_OFFLINE: &str = "agent_offline";
pub const TYPE_SERVER_LIST: &str = "server_list";
pub const TYPE_LIFE_PROBE_LIST: &str = "life_probe_list";

/// One wire frame.  All fields except `type` are optional; unknown fields
/// round-trip through `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten, default)]
    pub extra: serde_json::Map<String, Value>,
}

impl Frame {
    /// A bare frame of the given type.
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            request_id: None,
            session: None,
            stream_id: None,
            payload: None,
            data: None,
            error: None,
            success: None,
            status: None,
            message: None,
            extra: serde_json::Map::new(),
        }
    }

    /// An outbound operation frame carrying a correlation ID and payload.
    pub fn request(kind: &str, request_id: &str, payload: Value) -> Self {
        let mut frame = Self::new(kind);
        frame.request_id = Some(request_id.to_owned());
        frame.payload = Some(payload);
        frame
    }

    /// An error frame addressed to a shell session.
    pub fn shell_error(session: &str, message: &str) -> Self {
        let mut frame = Self::new(TYPE_SHELL_ERROR);
        frame.session = Some(session.to_owned());
        frame.error = Some(Value::String(message.to_owned()));
        frame
    }

    /// A list frame whose payload field is named after its type
    /// (`{type:"server_list", server_list:[…]}`).
    pub fn list(kind: &str, items: Vec<Value>) -> Self {
        let mut frame = Self::new(kind);
        frame.extra.insert(kind.to_owned(), Value::Array(items));
        frame
    }
}

/// Routing category of an inbound agent frame.
///
/// Push categories are matched by type before the reply fallback: a
/// `shell_response` may carry a `request_id` echoed from the create command
/// and must still reach the shell bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Operation reply, correlated by `request_id`.
    Reply,
    /// Unsolicited metric sample.
    Metric,
    /// Unsolicited system information update.
    SysInfo,
    /// Shell session traffic, correlated by `session`.
    Shell,
    /// Log-stream chunk, correlated by `stream_id`.
    StreamChunk { end: bool },
    /// Agent self-upgrade progress.
    UpgradeStatus,
    /// Life-probe measurement.
    ProbeResult,
    /// Nothing we know how to route.
    Unknown,
}

/// Classify an inbound frame for the response router.
pub fn classify(frame: &Frame) -> FrameClass {
    match frame.kind.as_str() {
        TYPE_MONITOR => FrameClass::Metric,
        TYPE_SYSTEM_INFO => FrameClass::SysInfo,
        TYPE_SHELL_RESPONSE | TYPE_SHELL_CLOSE | TYPE_SHELL_ERROR | TYPE_WORKING_DIRECTORY => {
            FrameClass::Shell
        }
        TYPE_LOGS_STREAM_DATA => FrameClass::StreamChunk { end: false },
        TYPE_LOGS_STREAM_END => FrameClass::StreamChunk { end: true },
        TYPE_UPGRADE_STATUS => FrameClass::UpgradeStatus,
        TYPE_LIFE_PROBE_RESULT => FrameClass::ProbeResult,
        _ if frame.request_id.is_some() => FrameClass::Reply,
        _ => FrameClass::Unknown,
    }
}

/// Fresh correlation ID: 128 bits of OS entropy, hex-encoded.
/// Never derived from timestamps, so IDs stay unique across restarts.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
