//! Configuration system.
//!
//! Loads session configuration from JSON strings/files (file IO left to app).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Local bind address, e.g. `0.0.0.0:5900`.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Server address a client connects to.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Rendezvous server host, if any.
    #[serde(default)]
    pub master_address: Option<String>,
    #[serde(default = "default_master_port")]
    pub master_port: u16,
    /// Address announced to the master for LAN clients.
    #[serde(default = "default_local_ip")]
    pub local_ip_address: String,
    /// Fixed simulation tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Network statistics sampling period.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    /// Upper bound on how long a single poll waits for the transport.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Ticks after which the authority declares a winner (0 = never).
    #[serde(default)]
    pub round_ticks: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5900".to_string()
}

fn default_server_addr() -> String {
    "127.0.0.1:5900".to_string()
}

fn default_master_port() -> u16 {
    5902
}

fn default_local_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_tick_hz() -> u32 {
    30
}

fn default_stats_interval_ms() -> u64 {
    1000
}

fn default_poll_timeout_ms() -> u64 {
    1
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            server_addr: default_server_addr(),
            master_address: None,
            master_port: default_master_port(),
            local_ip_address: default_local_ip(),
            tick_hz: default_tick_hz(),
            stats_interval_ms: default_stats_interval_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            round_ticks: 0,
        }
    }
}

impl SessionConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = SessionConfig::from_json_str(r#"{ "tick_hz": 60 }"#).unwrap();
        assert_eq!(cfg.tick_hz, 60);
        assert_eq!(cfg.master_port, 5902);
        assert!(cfg.master_address.is_none());
        assert_eq!(cfg.poll_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn master_address_is_optional() {
        let cfg = SessionConfig::from_json_str(
            r#"{ "master_address": "master.example.net", "master_port": 7000 }"#,
        )
        .unwrap();
        assert_eq!(cfg.master_address.as_deref(), Some("master.example.net"));
        assert_eq!(cfg.master_port, 7000);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let cfg = SessionConfig::from_json_str(r#"{ "name": "Player", "round_ticks": 90 }"#)
            .unwrap();
        assert_eq!(cfg.round_ticks, 90);
        assert_eq!(cfg.tick_hz, 30);
    }
}
