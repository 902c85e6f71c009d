// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn write_delivers_to_socket_queue() -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = AgentConnection::new(7, tx);

    conn.write(Frame::new("process_list"))?;
    let frame = rx.recv().await.ok_or_else(|| anyhow::anyhow!("queue empty"))?;
    assert_eq!(frame.kind, "process_list");
    Ok(())
}

#[tokio::test]
async fn write_fails_after_close() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = AgentConnection::new(7, tx);

    conn.close();
    conn.close(); // idempotent

    assert!(conn.is_closed());
    assert_eq!(conn.write(Frame::new("process_list")), Err(BrokerError::TransportClosed));
}

#[tokio::test]
async fn write_fails_when_socket_task_gone() {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = AgentConnection::new(7, tx);

    drop(rx);
    assert_eq!(conn.write(Frame::new("process_list")), Err(BrokerError::TransportClosed));
}

#[test]
fn connection_ids_are_distinct() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let a = AgentConnection::new(7, tx.clone());
    let b = AgentConnection::new(7, tx);
    assert_ne!(a.conn_id, b.conn_id);
}
