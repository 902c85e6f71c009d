// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The broker value: one explicit owner for every correlation table.
//!
//! Constructed once at boot and passed to handlers — there is no
//! module-level mutable state anywhere in the crate.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::conn::AgentConnection;
use crate::pending::PendingTable;
use crate::protocol::{Frame, TYPE_AGENT_OFFLINE, TYPE_LIFE_PROBE_LIST, TYPE_SERVER_LIST};
use crate::registry::AgentRegistry;
use crate::shell::ShellBridge;
use crate::store::{MetricStore, ProbeStore, ServerStore};
use crate::subscription::{ListKind, Scope, SubscriptionHub};

pub struct Broker {
    pub config: BrokerConfig,
    pub registry: AgentRegistry,
    pub pending: PendingTable,
    pub subscriptions: SubscriptionHub,
    pub shell: ShellBridge,
    pub servers: Arc<dyn ServerStore>,
    pub metrics: Arc<dyn MetricStore>,
    pub probes: Arc<dyn ProbeStore>,
    pub shutdown: CancellationToken,
}

impl Broker {
    pub fn new(
        config: BrokerConfig,
        servers: Arc<dyn ServerStore>,
        metrics: Arc<dyn MetricStore>,
        probes: Arc<dyn ProbeStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let subscriptions = SubscriptionHub::new(config.listener_queue, config.metric_gap());
        Self {
            config,
            registry: AgentRegistry::new(),
            pending: PendingTable::new(),
            subscriptions,
            shell: ShellBridge::new(),
            servers,
            metrics,
            probes,
            shutdown,
        }
    }

    /// Register an authenticated agent connection.  A predecessor on the
    /// same server is closed, its in-flight requests failed, and the fleet
    /// list refreshed.
    pub async fn register_agent(&self, conn: Arc<AgentConnection>) {
        let server_id = conn.server_id;
        if let Some(old) = self.registry.register(conn).await {
            let failed = self.pending.fail_all(old.server_id).await;
            tracing::info!(
                server_id,
                failed_requests = failed,
                "replaced existing agent connection"
            );
        } else {
            tracing::info!(server_id, "agent connected");
        }
        self.refresh_server_list().await;
    }

    /// Tear down a departed agent connection.  A no-op when a newer
    /// connection has already taken the server's slot.
    pub async fn drop_agent(&self, server_id: u64, conn_id: uuid::Uuid) {
        if self.registry.unregister(server_id, conn_id).await.is_none() {
            return;
        }
        let failed = self.pending.fail_all(server_id).await;
        let closed_shells = self.shell.close_all(server_id, "agent disconnected").await;
        self.subscriptions
            .drop_streams_for(server_id, |stream_id| {
                let mut frame = Frame::new(crate::protocol::TYPE_LOGS_STREAM_END);
                frame.stream_id = Some(stream_id.to_owned());
                frame
            })
            .await;
        self.subscriptions.publish_lifecycle(server_id, Frame::new(TYPE_AGENT_OFFLINE)).await;
        self.refresh_server_list().await;
        tracing::info!(
            server_id,
            failed_requests = failed,
            closed_shells,
            "agent disconnected"
        );
    }

    /// Persist a metric sample and fan it out, rate-limited.  Shared by
    /// the WS `monitor` frame and the HTTP ingestion endpoint.
    ///
    /// Subscriber frames carry the sample in a field named after the type,
    /// like every other subscription payload.
    pub async fn ingest_metric(&self, server_id: u64, sample: serde_json::Value) {
        self.metrics.persist(server_id, &sample);
        let mut frame = Frame::new(crate::protocol::TYPE_MONITOR);
        frame.extra.insert(crate::protocol::TYPE_MONITOR.to_owned(), sample);
        self.subscriptions.publish_metric(server_id, frame).await;
    }

    /// Current fleet overview for one scope, with online flags merged in.
    pub async fn server_list_frame(&self, scope: Scope) -> Frame {
        let masked = scope == Scope::Public;
        let connected = self.registry.connected_ids().await;
        let mut items = self.servers.server_list(masked);
        for item in &mut items {
            let online = item
                .get("id")
                .and_then(serde_json::Value::as_u64)
                .map(|id| connected.contains(&id))
                .unwrap_or(false);
            if let Some(obj) = item.as_object_mut() {
                obj.insert("online".to_owned(), serde_json::Value::Bool(online));
            }
        }
        Frame::list(TYPE_SERVER_LIST, items)
    }

    pub async fn probe_list_frame(&self, scope: Scope) -> Frame {
        let masked = scope == Scope::Public;
        Frame::list(TYPE_LIFE_PROBE_LIST, self.probes.probe_list(masked))
    }

    /// Broadcast the fleet overview to both scope groups.
    pub async fn refresh_server_list(&self) {
        for scope in [Scope::Public, Scope::Authenticated] {
            let frame = self.server_list_frame(scope).await;
            self.subscriptions.publish_list(ListKind::Servers, scope, frame).await;
        }
    }

    /// Broadcast the probe list to both scope groups.
    pub async fn refresh_probe_list(&self) {
        for scope in [Scope::Public, Scope::Authenticated] {
            let frame = self.probe_list_frame(scope).await;
            self.subscriptions.publish_list(ListKind::Probes, scope, frame).await;
        }
    }
}

/// Periodic liveness refresh for list subscriptions: a missed change event
/// self-heals within one interval.
pub fn spawn_list_refresh(broker: Arc<Broker>) {
    let interval = broker.config.list_refresh();
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = broker.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            broker.refresh_server_list().await;
            broker.refresh_probe_list().await;
        }
    });
}
