// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleetbroker: agent session broker for a fleet of managed hosts.
//!
//! Owns agent WebSocket connections, multiplexes request/response
//! exchanges over them, correlates replies with waiting callers, fans out
//! unsolicited pushes (metrics, shell output, log tails) to subscribers,
//! and enforces consistent failure semantics when connections drop.

pub mod broker;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod pathsafe;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod shell;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod validator;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::broker::{spawn_list_refresh, Broker};
use crate::config::BrokerConfig;
use crate::store::MemoryStore;
use crate::transport::build_router;

/// Run the broker until shutdown.
pub async fn run(config: BrokerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(Broker::new(
        config,
        Arc::clone(&store) as Arc<dyn store::ServerStore>,
        Arc::clone(&store) as Arc<dyn store::MetricStore>,
        store as Arc<dyn store::ProbeStore>,
        shutdown.clone(),
    ));

    tracing::info!("fleetbroker listening on {addr}");
    spawn_list_refresh(Arc::clone(&broker));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let router = build_router(Arc::clone(&broker));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    // Closing every agent connection fails all pending requests through the
    // normal teardown path.
    broker.registry.close_all().await;
    Ok(())
}
