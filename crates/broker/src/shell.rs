// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bidirectional relay between shell owners and agents, keyed by session.
//!
//! Owner frames (`create`, `input`, `resize`, `close`) are forwarded to the
//! agent verbatim; agent frames (`shell_response`, `shell_close`,
//! `shell_error`, `working_directory`) are delivered to the owner looked up
//! by session ID.  A session lives as long as both its owner endpoint and
//! its agent connection.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::protocol::Frame;
use crate::subscription::Outbox;

/// One interactive shell session.
pub struct ShellSession {
    pub session_id: String,
    pub server_id: u64,
    pub owner: Outbox,
    pub created_at: Instant,
}

/// Session table for the shell relay.
#[derive(Default)]
pub struct ShellBridge {
    sessions: Mutex<HashMap<String, ShellSession>>,
}

impl ShellBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, session_id: &str, server_id: u64, owner: Outbox) {
        let session = ShellSession {
            session_id: session_id.to_owned(),
            server_id,
            owner,
            created_at: Instant::now(),
        };
        self.sessions.lock().await.insert(session_id.to_owned(), session);
    }

    pub async fn close(&self, session_id: &str) -> Option<ShellSession> {
        self.sessions.lock().await.remove(session_id)
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }

    /// Deliver an agent frame to the owning endpoint.  A `shell_close`
    /// retires the session.  Returns `false` for unknown sessions.
    pub async fn relay_to_owner(&self, frame: Frame) -> bool {
        let Some(session_id) = frame.session.clone() else {
            return false;
        };
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get(&session_id) else {
            return false;
        };
        let closing = frame.kind == crate::protocol::TYPE_SHELL_CLOSE;
        let delivered = session.owner.send(frame);
        if closing || !delivered {
            sessions.remove(&session_id);
        }
        delivered
    }

    /// Fail every session on a server, notifying owners.  Used when the
    /// agent connection drops.
    pub async fn close_all(&self, server_id: u64, reason: &str) -> usize {
        let removed: Vec<ShellSession> = {
            let mut sessions = self.sessions.lock().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.server_id == server_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        let count = removed.len();
        for session in removed {
            session.owner.send(Frame::shell_error(&session.session_id, reason));
        }
        count
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
