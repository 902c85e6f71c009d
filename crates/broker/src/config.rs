// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the fleet broker.
#[derive(Debug, Clone, clap::Parser)]
pub struct BrokerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "FLEET_BROKER_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9700, env = "FLEET_BROKER_PORT")]
    pub port: u16,

    /// Bearer token for operator API auth. If unset, auth is disabled.
    #[arg(long, env = "FLEET_BROKER_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Keep-alive ping interval for agent connections, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "FLEET_BROKER_PING_MS")]
    pub ping_interval_ms: u64,

    /// Read deadline for agent connections, in milliseconds.  Reset by any
    /// inbound frame or pong; elapse closes the connection.
    #[arg(long, default_value_t = 90_000, env = "FLEET_BROKER_READ_DEADLINE_MS")]
    pub read_deadline_ms: u64,

    /// Minimum gap between delivered metric frames per server, in
    /// milliseconds.
    #[arg(long, default_value_t = 1_000, env = "FLEET_BROKER_METRIC_GAP_MS")]
    pub metric_gap_ms: u64,

    /// Liveness refresh interval for list subscriptions, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "FLEET_BROKER_LIST_REFRESH_MS")]
    pub list_refresh_ms: u64,

    /// Outbound queue capacity per downstream listener.
    #[arg(long, default_value_t = 64, env = "FLEET_BROKER_LISTENER_QUEUE")]
    pub listener_queue: usize,

    /// Paths agents must never serve, regardless of the requested base.
    #[arg(
        long = "denied-path",
        env = "FLEET_BROKER_DENIED_PATHS",
        value_delimiter = ',',
        default_value = "/etc/shadow,/etc/gshadow,/etc/sudoers"
    )]
    pub denied_paths: Vec<String>,
}

impl BrokerConfig {
    pub fn ping_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ping_interval_ms)
    }

    pub fn read_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.read_deadline_ms)
    }

    pub fn metric_gap(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.metric_gap_ms)
    }

    pub fn list_refresh(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.list_refresh_ms)
    }
}
