// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single source of truth for which agent is connected right now.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::conn::AgentConnection;

/// Maps server ID to its one active connection.
#[derive(Default)]
pub struct AgentRegistry {
    conns: RwLock<HashMap<u64, Arc<AgentConnection>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, atomically replacing any prior one for the
    /// same server.  The prior connection is closed and returned so the
    /// caller can fail its in-flight work.
    pub async fn register(&self, conn: Arc<AgentConnection>) -> Option<Arc<AgentConnection>> {
        let prev = {
            let mut conns = self.conns.write().await;
            conns.insert(conn.server_id, conn)
        };
        if let Some(ref old) = prev {
            old.close();
        }
        prev
    }

    pub async fn lookup(&self, server_id: u64) -> Option<Arc<AgentConnection>> {
        self.conns.read().await.get(&server_id).map(Arc::clone)
    }

    /// Remove the entry only if it is still the given connection.
    ///
    /// Returns the removed connection, or `None` when a newer connection
    /// has already taken the slot (stale teardown).
    pub async fn unregister(
        &self,
        server_id: u64,
        conn_id: uuid::Uuid,
    ) -> Option<Arc<AgentConnection>> {
        let mut conns = self.conns.write().await;
        match conns.get(&server_id) {
            Some(cur) if cur.conn_id == conn_id => {
                let removed = conns.remove(&server_id);
                if let Some(ref conn) = removed {
                    conn.close();
                }
                removed
            }
            _ => None,
        }
    }

    pub async fn connected_ids(&self) -> Vec<u64> {
        self.conns.read().await.keys().copied().collect()
    }

    pub async fn is_connected(&self, server_id: u64) -> bool {
        self.conns.read().await.contains_key(&server_id)
    }

    /// Close every connection.  Each socket task observes its token and
    /// runs the normal teardown path.
    pub async fn close_all(&self) {
        let conns = self.conns.read().await;
        for conn in conns.values() {
            conn.close();
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
