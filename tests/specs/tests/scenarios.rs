// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: a real broker on loopback TCP, a scripted agent
//! on one side, REST and subscriber sockets on the other.

use std::time::Duration;

use serde_json::json;

use fleet_specs::TestBroker;

// -- Request/response ---------------------------------------------------------

#[tokio::test]
async fn process_list_round_trip() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut agent = harness.connect_agent(7, "secret-7").await?;
    harness.wait_agent_online(7).await?;

    let caller = tokio::spawn({
        let url = format!("{}/api/v1/servers/7/processes", harness.base_url());
        async move { reqwest::get(url).await }
    });

    let request = agent.recv().await?;
    assert_eq!(request["type"], "process_list");
    let request_id = request["request_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("request_id missing"))?
        .to_owned();

    agent
        .send(&json!({
            "type": "process_list_response",
            "request_id": request_id,
            "data": {"count": 3}
        }))
        .await?;

    let resp = caller.await??;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body, json!({"count": 3}));
    Ok(())
}

#[tokio::test]
async fn agent_error_envelope_reaches_caller() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut agent = harness.connect_agent(7, "secret-7").await?;
    harness.wait_agent_online(7).await?;

    let caller = tokio::spawn({
        let url = format!("{}/api/v1/servers/7/docker/containers", harness.base_url());
        async move { reqwest::get(url).await }
    });

    let request = agent.recv().await?;
    assert_eq!(request["type"], "docker_containers");
    agent
        .send(&json!({
            "type": "docker_containers",
            "request_id": request["request_id"],
            "success": false,
            "error": {"message": "daemon down"}
        }))
        .await?;

    let resp = caller.await??;
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"]["code"], "AGENT_ERROR");
    assert_eq!(body["error"]["message"], "daemon down");
    Ok(())
}

// -- Disconnect semantics -----------------------------------------------------

#[tokio::test]
async fn disconnect_fans_out_to_every_waiter() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut agent = harness.connect_agent(7, "secret-7").await?;
    harness.wait_agent_online(7).await?;

    let mut callers = Vec::new();
    for _ in 0..3 {
        let url = format!("{}/api/v1/servers/7/processes", harness.base_url());
        callers.push(tokio::spawn(async move { reqwest::get(url).await }));
    }

    // All three requests reach the wire, then the transport drops.
    for _ in 0..3 {
        let request = agent.recv().await?;
        assert_eq!(request["type"], "process_list");
    }
    agent.close().await;

    for caller in callers {
        let resp = caller.await??;
        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = resp.json().await?;
        assert_eq!(body["error"]["code"], "AGENT_DISCONNECTED");
    }

    harness.wait_agent_offline(7).await?;
    assert_eq!(harness.broker.pending.pending_for(7).await, 0);
    Ok(())
}

#[tokio::test]
async fn reconnect_supersedes_prior_connection() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut first = harness.connect_agent(7, "secret-7").await?;
    harness.wait_agent_online(7).await?;

    let _second = harness.connect_agent(7, "secret-7").await?;

    // The replaced connection is closed by the broker.
    first.wait_closed().await?;

    // The server stays online through its successor.
    assert!(harness.broker.registry.is_connected(7).await);
    Ok(())
}

#[tokio::test]
async fn wrong_secret_is_rejected_before_upgrade() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    assert!(harness.connect_agent(7, "wrong").await.is_err());
    assert!(harness.connect_agent(42, "secret-7").await.is_err());
    Ok(())
}

// -- Metric fan-out -----------------------------------------------------------

#[tokio::test]
async fn metric_broadcast_is_rate_limited_per_subscriber() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut agent = harness.connect_agent(9, "secret-9").await?;
    harness.wait_agent_online(9).await?;

    let mut sub_a = harness.connect_subscriber("/ws/servers/9/metrics").await?;
    let mut sub_b = harness.connect_subscriber("/ws/servers/9/metrics").await?;
    // Subscriptions register asynchronously after the handshake.
    let deadline = tokio::time::Instant::now() + fleet_specs::RECV_TIMEOUT;
    while harness.broker.subscriptions.metric_listener_count(9).await < 2 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "subscribers never attached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for i in 0..10 {
        agent.send(&json!({"type": "monitor", "data": {"cpu": i}})).await?;
    }

    for sub in [&mut sub_a, &mut sub_b] {
        let frame = sub.recv().await?;
        assert_eq!(frame["type"], "monitor");
        assert_eq!(frame["monitor"]["cpu"], 0);
        // Nothing further inside the rate-limit window.
        assert!(sub.try_recv(Duration::from_millis(300)).await.is_none());
    }

    // Samples are persisted regardless of the limiter.
    assert_eq!(harness.store.samples(9).len(), 10);
    Ok(())
}

#[tokio::test]
async fn metric_subscribers_see_agent_offline() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let agent = harness.connect_agent(9, "secret-9").await?;
    harness.wait_agent_online(9).await?;

    let mut sub = harness.connect_subscriber("/ws/servers/9/metrics").await?;
    let deadline = tokio::time::Instant::now() + fleet_specs::RECV_TIMEOUT;
    while harness.broker.subscriptions.metric_listener_count(9).await < 1 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "subscriber never attached");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    agent.close().await;
    let frame = sub.recv().await?;
    assert_eq!(frame["type"], "agent_offline");
    Ok(())
}

// -- List subscriptions -------------------------------------------------------

#[tokio::test]
async fn server_list_masks_addresses_for_public_scope() -> anyhow::Result<()> {
    let harness = TestBroker::start(Some("tok")).await?;

    let mut public = harness.connect_subscriber("/ws/servers").await?;
    let snapshot = public.recv().await?;
    assert_eq!(snapshot["type"], "server_list");
    assert_eq!(snapshot["server_list"][0]["public_address"], "203.0.*.*");

    let mut authed = harness.connect_subscriber("/ws/servers?token=tok").await?;
    let snapshot = authed.recv().await?;
    assert_eq!(snapshot["server_list"][0]["public_address"], "203.0.113.7");
    Ok(())
}

#[tokio::test]
async fn server_list_refreshes_on_agent_connect() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut sub = harness.connect_subscriber("/ws/servers").await?;

    let snapshot = sub.recv().await?;
    let online = snapshot["server_list"]
        .as_array()
        .map(|items| items.iter().any(|s| s["online"] == true))
        .unwrap_or(false);
    assert!(!online, "no agent should be online yet");

    let _agent = harness.connect_agent(7, "secret-7").await?;
    harness.wait_agent_online(7).await?;

    let refreshed = sub.recv().await?;
    let servers = refreshed["server_list"]
        .as_array()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("server_list missing"))?;
    let host7 = servers
        .iter()
        .find(|s| s["id"] == 7)
        .ok_or_else(|| anyhow::anyhow!("server 7 missing"))?;
    assert_eq!(host7["online"], true);
    Ok(())
}

// -- Shell relay --------------------------------------------------------------

#[tokio::test]
async fn shell_round_trip_and_owner_close() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut agent = harness.connect_agent(7, "secret-7").await?;
    harness.wait_agent_online(7).await?;

    let mut owner = harness.connect_subscriber("/ws/servers/7/shell").await?;
    owner.send(&json!({"type": "create", "payload": {"cols": 80, "rows": 24}})).await?;

    // The create frame reaches the agent with a session assigned.
    let create = agent.recv().await?;
    assert_eq!(create["type"], "create");
    let session = create["session"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("session missing"))?
        .to_owned();

    // Agent output flows back to the owner by session.
    agent
        .send(&json!({"type": "shell_response", "session": session, "output": "$ "}))
        .await?;
    let output = owner.recv().await?;
    assert_eq!(output["type"], "shell_response");
    assert_eq!(output["output"], "$ ");

    // Owner input is forwarded verbatim.
    owner.send(&json!({"type": "input", "session": session, "data": "ls\n"})).await?;
    let input = agent.recv().await?;
    assert_eq!(input["type"], "input");
    assert_eq!(input["data"], "ls\n");

    // Owner departure forwards a close for the session.
    owner.close().await;
    let close = agent.recv().await?;
    assert_eq!(close["type"], "close");
    assert_eq!(close["session"], session.as_str());
    assert_eq!(harness.broker.shell.session_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn agent_disconnect_errors_shell_owners() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut agent = harness.connect_agent(7, "secret-7").await?;
    harness.wait_agent_online(7).await?;

    let mut owner = harness.connect_subscriber("/ws/servers/7/shell").await?;
    owner.send(&json!({"type": "create"})).await?;
    agent.recv().await?; // create delivered

    agent.close().await;

    let error = owner.recv().await?;
    assert_eq!(error["type"], "shell_error");
    assert_eq!(error["error"], "agent disconnected");
    assert_eq!(harness.broker.shell.session_count().await, 0);
    Ok(())
}

// -- Log streams --------------------------------------------------------------

#[tokio::test]
async fn log_stream_relays_until_end() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut agent = harness.connect_agent(7, "secret-7").await?;
    harness.wait_agent_online(7).await?;

    let mut tail = harness.connect_subscriber("/ws/servers/7/docker/logs?container=web").await?;

    let start = agent.recv().await?;
    assert_eq!(start["type"], "docker_logs_stream");
    assert_eq!(start["payload"]["container"], "web");
    let stream_id = start["stream_id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("stream_id missing"))?
        .to_owned();

    agent
        .send(&json!({
            "type": "docker_logs_stream_data",
            "stream_id": stream_id,
            "data": {"line": "GET /healthz 200"}
        }))
        .await?;
    agent.send(&json!({"type": "docker_logs_stream_end", "stream_id": stream_id})).await?;

    let chunk = tail.recv().await?;
    assert_eq!(chunk["type"], "docker_logs_stream_data");
    assert_eq!(chunk["data"]["line"], "GET /healthz 200");

    let end = tail.recv().await?;
    assert_eq!(end["type"], "docker_logs_stream_end");

    // The subscription is gone once the stream ends.
    tail.wait_closed().await?;
    assert_eq!(harness.broker.subscriptions.stream_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn departing_listener_stops_the_stream() -> anyhow::Result<()> {
    let harness = TestBroker::start(None).await?;
    let mut agent = harness.connect_agent(7, "secret-7").await?;
    harness.wait_agent_online(7).await?;

    let tail = harness.connect_subscriber("/ws/servers/7/docker/logs?container=web").await?;
    let start = agent.recv().await?;
    let stream_id = start["stream_id"].clone();

    tail.close().await;

    let stop = agent.recv().await?;
    assert_eq!(stop["type"], "docker_logs_stream");
    assert_eq!(stop["stream_id"], stream_id);
    assert_eq!(stop["payload"]["action"], "stop");
    assert_eq!(harness.broker.subscriptions.stream_count().await, 0);
    Ok(())
}
