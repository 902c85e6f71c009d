// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistence collaborators, referenced by interface only.
//!
//! The broker core does not own durable storage; it talks to these traits
//! and ships an in-memory implementation that backs the default binary and
//! every test.  A database-backed implementation lives outside the core.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One managed host on record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: u64,
    pub name: String,
    /// Shared secret the agent presents on connect.  Never serialized into
    /// list snapshots.
    #[serde(skip_serializing)]
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_info: Option<Value>,
}

/// One uptime probe on record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub id: String,
    pub name: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<Value>,
}

/// Server records and agent credentials.
pub trait ServerStore: Send + Sync {
    /// Shared secret for the server, for agent connect and metric ingest.
    fn secret(&self, server_id: u64) -> Option<String>;

    fn server(&self, server_id: u64) -> Option<ServerRecord>;

    /// Apply a pushed `system_info` update.  Returns `true` when the public
    /// address changed, in which case the implementation refreshes its geo
    /// lookup for the server.
    fn update_system_info(&self, server_id: u64, info: Value) -> bool;

    /// Snapshot of all servers as list-frame entries.  `masked` strips
    /// address detail for unauthenticated subscribers.
    fn server_list(&self, masked: bool) -> Vec<Value>;
}

/// Metric sample sink.
pub trait MetricStore: Send + Sync {
    fn persist(&self, server_id: u64, sample: &Value);
}

/// Probe records and their latest results.
pub trait ProbeStore: Send + Sync {
    fn record_result(&self, probe_id: &str, result: &Value);

    /// Snapshot of all probes as list-frame entries.  `masked` hides the
    /// probe target from unauthenticated subscribers.
    fn probe_list(&self, masked: bool) -> Vec<Value>;
}

/// Mask an address for public consumption.  IPv4 keeps the first two
/// octets; IPv6 keeps the leading groups; anything else is fully hidden.
pub fn mask_address(address: &str) -> String {
    let octets: Vec<&str> = address.split('.').collect();
    if octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok()) {
        return format!("{}.{}.*.*", octets[0], octets[1]);
    }
    if let Some((head, _)) = address.split_once("::") {
        if !head.is_empty() {
            return format!("{head}::*");
        }
    }
    let groups: Vec<&str> = address.split(':').collect();
    if groups.len() > 2 {
        return format!("{}:{}::*", groups[0], groups[1]);
    }
    "*".repeat(address.len().min(8))
}

// -- In-memory implementation -------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    servers: HashMap<u64, ServerRecord>,
    probes: HashMap<String, ProbeRecord>,
    samples: HashMap<u64, Vec<Value>>,
}

/// In-memory store used by the default binary and the test suites.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_server(&self, record: ServerRecord) {
        if let Ok(mut inner) = self.inner.write() {
            inner.servers.insert(record.id, record);
        }
    }

    pub fn add_probe(&self, record: ProbeRecord) {
        if let Ok(mut inner) = self.inner.write() {
            inner.probes.insert(record.id.clone(), record);
        }
    }

    /// Samples persisted for a server, oldest first.
    pub fn samples(&self, server_id: u64) -> Vec<Value> {
        self.inner
            .read()
            .map(|inner| inner.samples.get(&server_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl ServerStore for MemoryStore {
    fn secret(&self, server_id: u64) -> Option<String> {
        self.inner.read().ok()?.servers.get(&server_id).map(|s| s.secret.clone())
    }

    fn server(&self, server_id: u64) -> Option<ServerRecord> {
        self.inner.read().ok()?.servers.get(&server_id).cloned()
    }

    fn update_system_info(&self, server_id: u64, info: Value) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        let Some(record) = inner.servers.get_mut(&server_id) else {
            return false;
        };

        let pushed_address =
            info.get("public_ip").and_then(|v| v.as_str()).map(str::to_owned);
        let address_changed = match pushed_address {
            Some(ref addr) => record.public_address.as_deref() != Some(addr.as_str()),
            None => false,
        };
        if let Some(addr) = pushed_address {
            record.public_address = Some(addr);
        }
        record.system_info = Some(info);
        if address_changed {
            // Geo data is keyed to the address; stale entries are cleared
            // and re-resolved by the lookup job outside the core.
            record.location = None;
        }
        address_changed
    }

    fn server_list(&self, masked: bool) -> Vec<Value> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        let mut records: Vec<&ServerRecord> = inner.servers.values().collect();
        records.sort_by_key(|r| r.id);
        records
            .into_iter()
            .map(|record| {
                let mut entry = serde_json::to_value(record).unwrap_or(Value::Null);
                if masked {
                    if let Some(obj) = entry.as_object_mut() {
                        if let Some(addr) = record.public_address.as_deref() {
                            obj.insert(
                                "public_address".to_owned(),
                                Value::String(mask_address(addr)),
                            );
                        }
                    }
                }
                entry
            })
            .collect()
    }
}

impl MetricStore for MemoryStore {
    fn persist(&self, server_id: u64, sample: &Value) {
        if let Ok(mut inner) = self.inner.write() {
            inner.samples.entry(server_id).or_default().push(sample.clone());
        }
    }
}

impl ProbeStore for MemoryStore {
    fn record_result(&self, probe_id: &str, result: &Value) {
        if let Ok(mut inner) = self.inner.write() {
            if let Some(probe) = inner.probes.get_mut(probe_id) {
                probe.last_result = Some(result.clone());
            }
        }
    }

    fn probe_list(&self, masked: bool) -> Vec<Value> {
        let Ok(inner) = self.inner.read() else {
            return Vec::new();
        };
        let mut records: Vec<&ProbeRecord> = inner.probes.values().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
            .into_iter()
            .map(|record| {
                let mut entry = serde_json::to_value(record).unwrap_or(Value::Null);
                if masked {
                    if let Some(obj) = entry.as_object_mut() {
                        obj.insert("target".to_owned(), Value::String("hidden".to_owned()));
                    }
                }
                entry
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
