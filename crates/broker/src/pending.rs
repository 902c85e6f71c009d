// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Correlation table matching agent replies to waiting callers.
//!
//! Two indices — request ID and server ID — are kept consistent under one
//! lock, so a disconnect can fail every waiter for a server without
//! scanning, and completion/cancellation stay mutually exclusive.

use std::collections::{HashMap, HashSet};

use tokio::sync::{oneshot, Mutex};

use crate::error::BrokerError;
use crate::protocol::Frame;

/// Outcome delivered to a waiter: the reply frame, or a synthetic failure.
pub type PendingResult = Result<Frame, BrokerError>;

struct Waiter {
    server_id: u64,
    tx: oneshot::Sender<PendingResult>,
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<String, Waiter>,
    by_server: HashMap<u64, HashSet<String>>,
}

impl Indices {
    fn remove(&mut self, request_id: &str) -> Option<Waiter> {
        let waiter = self.by_id.remove(request_id)?;
        if let Some(ids) = self.by_server.get_mut(&waiter.server_id) {
            ids.remove(request_id);
            if ids.is_empty() {
                self.by_server.remove(&waiter.server_id);
            }
        }
        Some(waiter)
    }
}

/// Table of in-flight operations.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<Indices>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter and return the receiver the caller blocks on.
    pub async fn register(&self, request_id: &str, server_id: u64) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().await;
        inner.by_id.insert(request_id.to_owned(), Waiter { server_id, tx });
        inner.by_server.entry(server_id).or_default().insert(request_id.to_owned());
        rx
    }

    /// Deliver a reply to its waiter.  Returns `false` for late or duplicate
    /// replies, which are dropped without observable effect.
    pub async fn complete(&self, request_id: &str, frame: Frame) -> bool {
        let waiter = self.inner.lock().await.remove(request_id);
        match waiter {
            Some(w) => w.tx.send(Ok(frame)).is_ok(),
            None => false,
        }
    }

    /// Retire a waiter on timeout.  The caller observes its deadline branch;
    /// a reply arriving afterwards is dropped.
    pub async fn cancel(&self, request_id: &str) -> bool {
        self.inner.lock().await.remove(request_id).is_some()
    }

    /// Fail every pending entry for a server with a synthetic disconnect.
    /// Invoked exactly when the registry evicts a connection.
    pub async fn fail_all(&self, server_id: u64) -> usize {
        let waiters: Vec<Waiter> = {
            let mut inner = self.inner.lock().await;
            let ids = inner.by_server.remove(&server_id).unwrap_or_default();
            ids.iter().filter_map(|id| inner.by_id.remove(id)).collect()
        };
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(BrokerError::AgentDisconnected));
        }
        count
    }

    /// Number of in-flight entries for a server.
    pub async fn pending_for(&self, server_id: u64) -> usize {
        self.inner.lock().await.by_server.get(&server_id).map(HashSet::len).unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.by_id.is_empty()
    }
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
