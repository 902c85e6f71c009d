// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end broker scenarios.
//!
//! Serves a real broker on a loopback TCP port and exposes scripted agent
//! and subscriber WebSocket peers, so the full path — REST call, dispatch,
//! wire frame, agent reply, correlation — is exercised over the network.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use fleetbroker::broker::Broker;
use fleetbroker::config::BrokerConfig;
use fleetbroker::store::{MemoryStore, MetricStore, ProbeStore, ServerRecord, ServerStore};
use fleetbroker::transport::build_router;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A broker served on a loopback port for one test.
pub struct TestBroker {
    pub broker: Arc<Broker>,
    pub store: Arc<MemoryStore>,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TestBroker {
    /// Start a broker with servers 7 and 9 on record.
    pub async fn start(auth_token: Option<&str>) -> anyhow::Result<Self> {
        let config = BrokerConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            auth_token: auth_token.map(str::to_owned),
            ping_interval_ms: 30_000,
            read_deadline_ms: 90_000,
            metric_gap_ms: 1_000,
            list_refresh_ms: 30_000,
            listener_queue: 64,
            denied_paths: vec!["/etc/shadow".to_owned()],
        };

        let store = Arc::new(MemoryStore::new());
        for id in [7u64, 9] {
            store.add_server(ServerRecord {
                id,
                name: format!("host-{id}"),
                secret: format!("secret-{id}"),
                public_address: Some("203.0.113.7".to_owned()),
                location: None,
                system_info: None,
            });
        }

        let shutdown = CancellationToken::new();
        let broker = Arc::new(Broker::new(
            config,
            Arc::clone(&store) as Arc<dyn ServerStore>,
            Arc::clone(&store) as Arc<dyn MetricStore>,
            Arc::clone(&store) as Arc<dyn ProbeStore>,
            shutdown.clone(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = build_router(Arc::clone(&broker));
        let graceful = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(graceful.cancelled_owned())
                .await;
        });

        Ok(Self { broker, store, addr, shutdown })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, path_and_query: &str) -> String {
        format!("ws://{}{}", self.addr, path_and_query)
    }

    /// Connect a scripted agent, presenting the server's shared secret.
    pub async fn connect_agent(&self, server_id: u64, secret: &str) -> anyhow::Result<WsPeer> {
        let mut request = self.ws_url("/agent/ws").into_client_request()?;
        request
            .headers_mut()
            .insert("x-server-id", HeaderValue::from_str(&server_id.to_string())?);
        request.headers_mut().insert("x-server-secret", HeaderValue::from_str(secret)?);
        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        Ok(WsPeer { ws })
    }

    /// Connect a subscriber socket (list, metrics, logs, shell).
    pub async fn connect_subscriber(&self, path_and_query: &str) -> anyhow::Result<WsPeer> {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url(path_and_query)).await?;
        Ok(WsPeer { ws })
    }

    /// Wait until the broker reports the server's agent online.
    pub async fn wait_agent_online(&self, server_id: u64) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.broker.registry.is_connected(server_id).await {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        anyhow::bail!("agent for server {server_id} never came online")
    }

    /// Wait until the broker reports the server's agent gone.
    pub async fn wait_agent_offline(&self, server_id: u64) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if !self.broker.registry.is_connected(server_id).await {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        anyhow::bail!("agent for server {server_id} never went offline")
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// One end of a test WebSocket, speaking JSON frames.
pub struct WsPeer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsPeer {
    pub async fn send(&mut self, frame: &serde_json::Value) -> anyhow::Result<()> {
        let text = serde_json::to_string(frame)?;
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Receive the next JSON frame, skipping transport control messages.
    pub async fn recv(&mut self) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for frame"))?;
            match msg {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => anyhow::bail!("socket closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Receive within `wait`, or `None` when nothing arrives in time.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<serde_json::Value> {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(Ok(frame)) => Some(frame),
            _ => None,
        }
    }

    /// Wait for the peer to close the socket.
    pub async fn wait_closed(&mut self) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let msg = tokio::time::timeout_at(deadline, self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for close"))?;
            match msg {
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Err(_)) => return Ok(()),
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
