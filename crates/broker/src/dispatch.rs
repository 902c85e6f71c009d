// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Caller-facing one-shot request/response dispatch.

use std::time::Duration;

use serde_json::Value;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::protocol::{new_request_id, Frame};
use crate::validator;

/// Listings and stats.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// File reads, writes, and tree walks.
pub const FILE_TIMEOUT: Duration = Duration::from_secs(60);
/// Image pulls, compose up, agent upgrades.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(120);
/// Interactive probes: cwd lookups, process queries.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

impl Broker {
    /// Send one operation to an agent and wait for its correlated reply.
    ///
    /// The reply frame is normalized through the validator before it is
    /// handed back; a rejected reply surfaces as [`BrokerError::Agent`] carrying
    /// the agent's message verbatim.  No ordering is guaranteed between
    /// concurrent calls to the same server.
    pub async fn send_and_wait(
        &self,
        server_id: u64,
        op: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Frame, BrokerError> {
        let conn = self.registry.lookup(server_id).await.ok_or(BrokerError::AgentNotConnected)?;

        let request_id = new_request_id();
        let rx = self.pending.register(&request_id, server_id).await;

        if let Err(err) = conn.write(Frame::request(op, &request_id, payload)) {
            self.pending.cancel(&request_id).await;
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(frame))) => {
                validator::check(&frame).map_err(BrokerError::Agent)?;
                Ok(frame)
            }
            // Synthetic failure from a disconnect fan-out.
            Ok(Ok(Err(err))) => Err(err),
            // Waiter dropped without a result: cancelled out from under us.
            Ok(Err(_)) => Err(BrokerError::Internal("pending entry vanished".to_owned())),
            Err(_) => {
                self.pending.cancel(&request_id).await;
                Err(BrokerError::RequestTimeout)
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
