// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reply-envelope normalization.
//!
//! Agents answer in several dialects: a dedicated error type, a `success`
//! flag in assorted encodings, an HTTP-ish `status`, or a structured
//! `error` field.  This module reduces all of them to one decision so the
//! rest of the broker only ever sees `Ok` or an error message.

use serde_json::Value;

use crate::protocol::{Frame, TYPE_DOCKER_ERROR, TYPE_ERROR};

/// Inspect a reply frame.  `Err` carries the agent-supplied message.
pub fn check(frame: &Frame) -> Result<(), String> {
    if frame.kind == TYPE_ERROR || frame.kind == TYPE_DOCKER_ERROR {
        return Err(error_message(frame));
    }
    if let Some(ref success) = frame.success {
        if is_falsy(success) {
            return Err(error_message(frame));
        }
    }
    if let Some(ref status) = frame.status {
        if is_failed_status(status) {
            return Err(error_message(frame));
        }
    }
    if let Some(ref error) = frame.error {
        if !is_empty_value(error) {
            return Err(error_message(frame));
        }
    }
    Ok(())
}

/// Falsy `success` encodings: false, "false"/"0"/"no"/"", 0.
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => !b,
        Value::String(s) => matches!(s.as_str(), "false" | "0" | "no" | ""),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// Failed `status` encodings: "error"/"failed"/"failure", or a number ≥ 400.
fn is_failed_status(value: &Value) -> bool {
    match value {
        Value::String(s) => matches!(s.as_str(), "error" | "failed" | "failure"),
        Value::Number(n) => n.as_f64().map(|v| v >= 400.0).unwrap_or(false),
        _ => false,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Extract the most specific message the reply offers.
///
/// Order: `error` (its `message` subfield, then its `error` subfield, then
/// the value itself), `message`, `msg`, `data.error` / `data.message`,
/// fallback `"unknown error"`.
pub fn error_message(frame: &Frame) -> String {
    if let Some(ref error) = frame.error {
        if let Some(text) = stringify(error) {
            return text;
        }
    }
    if let Some(ref message) = frame.message {
        if !message.is_empty() {
            return message.clone();
        }
    }
    if let Some(text) = frame.extra.get("msg").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return text.to_owned();
        }
    }
    if let Some(ref data) = frame.data {
        for key in ["error", "message"] {
            if let Some(text) = data.get(key).and_then(stringify) {
                return text;
            }
        }
    }
    "unknown error".to_owned()
}

/// Render a non-empty error value as text.  Structured values prefer their
/// `message` then `error` subfields, else are JSON-encoded.
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(m) if !m.is_empty() => {
            for key in ["message", "error"] {
                if let Some(text) = m.get(key).and_then(|v| v.as_str()) {
                    if !text.is_empty() {
                        return Some(text.to_owned());
                    }
                }
            }
            serde_json::to_string(value).ok()
        }
        Value::Null | Value::String(_) => None,
        other if is_empty_value(other) => None,
        other => serde_json::to_string(other).ok(),
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
