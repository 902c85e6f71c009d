// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Response router: classifies every inbound agent frame and hands it to
//! the pending table, a subscription hub, or the shell bridge.
//!
//! This is the only place a pending entry is retired successfully; every
//! other retirement is a cancellation.

use crate::broker::Broker;
use crate::protocol::{classify, Frame, FrameClass};

pub async fn route_frame(broker: &Broker, server_id: u64, frame: Frame) {
    match classify(&frame) {
        FrameClass::Reply => {
            let request_id = frame.request_id.clone().unwrap_or_default();
            if !broker.pending.complete(&request_id, frame).await {
                tracing::debug!(server_id, request_id = %request_id, "reply with no waiter dropped");
            }
        }
        FrameClass::Metric => {
            let sample = frame.data.or(frame.payload).unwrap_or(serde_json::Value::Null);
            broker.ingest_metric(server_id, sample).await;
        }
        FrameClass::SysInfo => {
            let info = frame.data.or(frame.payload).unwrap_or(serde_json::Value::Null);
            let address_changed = broker.servers.update_system_info(server_id, info);
            if address_changed {
                tracing::info!(server_id, "public address changed, geo data refreshed");
            }
            broker.refresh_server_list().await;
        }
        FrameClass::Shell => {
            if !broker.shell.relay_to_owner(frame).await {
                tracing::debug!(server_id, "shell frame for unknown session dropped");
            }
        }
        FrameClass::StreamChunk { end } => {
            let stream_id = frame.stream_id.clone().unwrap_or_default();
            if !broker.subscriptions.publish_stream(&stream_id, frame, end).await {
                tracing::debug!(server_id, stream_id = %stream_id, "chunk for unknown stream dropped");
            }
        }
        FrameClass::UpgradeStatus => {
            broker.subscriptions.publish_lifecycle(server_id, frame).await;
        }
        FrameClass::ProbeResult => {
            let probe_id = frame
                .extra
                .get("probe_id")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .unwrap_or_default();
            let result = frame.data.or(frame.payload).unwrap_or(serde_json::Value::Null);
            broker.probes.record_result(&probe_id, &result);
            broker.refresh_probe_list().await;
        }
        FrameClass::Unknown => {
            tracing::debug!(server_id, kind = %frame.kind, "unroutable frame discarded");
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
