// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out of agent-originated frames to downstream listeners.
//!
//! Three kinds: live metrics keyed by server, scope-grouped list
//! subscriptions (fleet overview, probe list), and single-listener log
//! streams keyed by stream ID.  Delivery never blocks the read loop: each
//! listener has a bounded queue and a frame that does not fit is dropped
//! for that listener only.  Broadcasts snapshot the listener set under the
//! lock, then release before sending.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::protocol::Frame;

/// Identifies one downstream listener within a hub.
pub type ListenerId = u64;

/// Authorization scope of a list subscriber.  Public listeners receive the
/// masked variant of every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Public,
    Authenticated,
}

/// Which list a subscriber follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Servers,
    Probes,
}

/// Bounded, non-blocking outbox for one listener.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Frame>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Try to deliver.  A slow consumer loses this frame only; a departed
    /// consumer reports `false` so the hub can drop the slot.
    pub fn send(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                tracing::debug!(kind = %frame.kind, "listener queue full, dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

struct MetricTopic {
    listeners: HashMap<ListenerId, Outbox>,
    last_publish: Option<Instant>,
}

struct StreamSlot {
    server_id: u64,
    listener: Outbox,
}

#[derive(Default)]
struct ListTopic {
    listeners: HashMap<ListenerId, Outbox>,
}

/// All downstream subscriptions.
pub struct SubscriptionHub {
    queue_capacity: usize,
    metric_gap: Duration,
    next_id: std::sync::atomic::AtomicU64,
    metrics: Mutex<HashMap<u64, MetricTopic>>,
    lists: Mutex<HashMap<(ListKind, Scope), ListTopic>>,
    streams: Mutex<HashMap<String, StreamSlot>>,
}

impl SubscriptionHub {
    pub fn new(queue_capacity: usize, metric_gap: Duration) -> Self {
        Self {
            queue_capacity,
            metric_gap,
            next_id: std::sync::atomic::AtomicU64::new(1),
            metrics: Mutex::new(HashMap::new()),
            lists: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
        }
    }

    fn fresh_id(&self) -> ListenerId {
        self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    // -- Live metrics ---------------------------------------------------------

    pub async fn subscribe_metrics(&self, server_id: u64) -> (ListenerId, mpsc::Receiver<Frame>) {
        let id = self.fresh_id();
        let (outbox, rx) = Outbox::channel(self.queue_capacity);
        let mut metrics = self.metrics.lock().await;
        metrics
            .entry(server_id)
            .or_insert_with(|| MetricTopic { listeners: HashMap::new(), last_publish: None })
            .listeners
            .insert(id, outbox);
        (id, rx)
    }

    pub async fn unsubscribe_metrics(&self, server_id: u64, id: ListenerId) {
        let mut metrics = self.metrics.lock().await;
        if let Some(topic) = metrics.get_mut(&server_id) {
            topic.listeners.remove(&id);
            if topic.listeners.is_empty() {
                metrics.remove(&server_id);
            }
        }
    }

    /// Publish a metric sample, rate-limited to one frame per gap per
    /// server.  Returns `false` when the limiter swallowed the frame.
    pub async fn publish_metric(&self, server_id: u64, frame: Frame) -> bool {
        let targets = {
            let mut metrics = self.metrics.lock().await;
            let Some(topic) = metrics.get_mut(&server_id) else {
                return false;
            };
            let now = Instant::now();
            if let Some(last) = topic.last_publish {
                if now.duration_since(last) < self.metric_gap {
                    return false;
                }
            }
            topic.last_publish = Some(now);
            topic.listeners.clone()
        };
        self.deliver_metrics(server_id, targets, frame).await;
        true
    }

    /// Publish a lifecycle frame (offline notice, upgrade progress) to a
    /// server's metric subscribers, bypassing the rate limiter.
    pub async fn publish_lifecycle(&self, server_id: u64, frame: Frame) {
        let targets = {
            let metrics = self.metrics.lock().await;
            match metrics.get(&server_id) {
                Some(topic) => topic.listeners.clone(),
                None => return,
            }
        };
        self.deliver_metrics(server_id, targets, frame).await;
    }

    async fn deliver_metrics(
        &self,
        server_id: u64,
        targets: HashMap<ListenerId, Outbox>,
        frame: Frame,
    ) {
        let mut dead = Vec::new();
        for (id, outbox) in &targets {
            if !outbox.send(frame.clone()) {
                dead.push(*id);
            }
        }
        for id in dead {
            self.unsubscribe_metrics(server_id, id).await;
        }
    }

    pub async fn metric_listener_count(&self, server_id: u64) -> usize {
        self.metrics
            .lock()
            .await
            .get(&server_id)
            .map(|t| t.listeners.len())
            .unwrap_or(0)
    }

    // -- List subscriptions ---------------------------------------------------

    pub async fn subscribe_list(
        &self,
        kind: ListKind,
        scope: Scope,
    ) -> (ListenerId, mpsc::Receiver<Frame>) {
        let id = self.fresh_id();
        let (outbox, rx) = Outbox::channel(self.queue_capacity);
        let mut lists = self.lists.lock().await;
        lists.entry((kind, scope)).or_default().listeners.insert(id, outbox);
        (id, rx)
    }

    pub async fn unsubscribe_list(&self, kind: ListKind, scope: Scope, id: ListenerId) {
        let mut lists = self.lists.lock().await;
        if let Some(topic) = lists.get_mut(&(kind, scope)) {
            topic.listeners.remove(&id);
            if topic.listeners.is_empty() {
                lists.remove(&(kind, scope));
            }
        }
    }

    /// Re-send the full current list to one scope group.
    pub async fn publish_list(&self, kind: ListKind, scope: Scope, frame: Frame) {
        let targets = {
            let lists = self.lists.lock().await;
            match lists.get(&(kind, scope)) {
                Some(topic) => topic.listeners.clone(),
                None => return,
            }
        };
        let mut dead = Vec::new();
        for (id, outbox) in &targets {
            if !outbox.send(frame.clone()) {
                dead.push(*id);
            }
        }
        for id in dead {
            self.unsubscribe_list(kind, scope, id).await;
        }
    }

    pub async fn has_list_listeners(&self, kind: ListKind, scope: Scope) -> bool {
        self.lists.lock().await.contains_key(&(kind, scope))
    }

    // -- Log streams ----------------------------------------------------------

    /// Attach the single listener for a stream.
    pub async fn register_stream(&self, stream_id: &str, server_id: u64, listener: Outbox) {
        self.streams
            .lock()
            .await
            .insert(stream_id.to_owned(), StreamSlot { server_id, listener });
    }

    /// Detach a stream.  Returns `true` when it was still registered, in
    /// which case the caller forwards a stop frame to the agent.
    pub async fn remove_stream(&self, stream_id: &str) -> bool {
        self.streams.lock().await.remove(stream_id).is_some()
    }

    /// Deliver a stream chunk.  An end chunk retires the subscription.
    pub async fn publish_stream(&self, stream_id: &str, frame: Frame, end: bool) -> bool {
        let mut streams = self.streams.lock().await;
        let Some(slot) = streams.get(stream_id) else {
            return false;
        };
        let delivered = slot.listener.send(frame);
        if end || !delivered {
            streams.remove(stream_id);
        }
        delivered
    }

    /// Drop every stream originating from a server, notifying listeners
    /// with a final end frame.
    pub async fn drop_streams_for(&self, server_id: u64, end_frame: impl Fn(&str) -> Frame) {
        let removed: Vec<(String, StreamSlot)> = {
            let mut streams = self.streams.lock().await;
            let ids: Vec<String> = streams
                .iter()
                .filter(|(_, slot)| slot.server_id == server_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter().filter_map(|id| streams.remove(&id).map(|slot| (id, slot))).collect()
        };
        for (id, slot) in removed {
            slot.listener.send(end_frame(&id));
        }
    }

    pub async fn stream_count(&self) -> usize {
        self.streams.lock().await.len()
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
