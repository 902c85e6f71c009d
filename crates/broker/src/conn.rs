// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent connection handle.
//!
//! The socket task owns the read side and drains the outbound queue, so
//! writes from concurrent producers (dispatcher, broadcasts, shell relay)
//! are serialized and each frame goes out atomically.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;
use crate::protocol::Frame;

/// Handle to one live agent connection.
///
/// At most one of these per server exists in the registry at any moment;
/// registering a replacement closes the prior handle first.
pub struct AgentConnection {
    pub server_id: u64,
    /// Distinguishes this connection from a successor on the same server,
    /// so a stale teardown cannot evict a newer registration.
    pub conn_id: uuid::Uuid,
    outbound: mpsc::UnboundedSender<Frame>,
    closed: CancellationToken,
}

impl AgentConnection {
    pub fn new(server_id: u64, outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self { server_id, conn_id: uuid::Uuid::new_v4(), outbound, closed: CancellationToken::new() }
    }

    /// Enqueue a frame for transmission.  Fails once the connection is
    /// closed or the socket task has exited.
    pub fn write(&self, frame: Frame) -> Result<(), BrokerError> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::TransportClosed);
        }
        self.outbound.send(frame).map_err(|_| BrokerError::TransportClosed)
    }

    /// Idempotent close.  The socket task observes the token and tears the
    /// transport down; subsequent writes fail.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token the socket task selects on.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
