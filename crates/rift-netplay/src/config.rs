//! Session and transport configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rift_netproto::constants::DEFAULT_LAN_PORTS;
use serde::{Deserialize, Serialize};

use crate::replication::StalenessPolicy;
use crate::transport::TransportKind;

/// Top-level session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Display name announced to other peers.
    pub player_name: String,
    /// Backend selected at startup; can be changed with `switch_transport`.
    pub transport: TransportKind,
    /// Host replication tick rate.
    pub tick_rate_hz: u32,
    /// Interval between periodic reliable full snapshots.
    pub full_sync_interval_ms: u64,
    /// How clients treat snapshots older than the last applied tick.
    pub staleness: StalenessPolicy,
    pub lan: LanConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            player_name: "Player".to_string(),
            transport: TransportKind::Lan,
            tick_rate_hz: 20,
            full_sync_interval_ms: 2_000,
            staleness: StalenessPolicy::default(),
            lan: LanConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }

    pub fn full_sync_interval(&self) -> Duration {
        Duration::from_millis(self.full_sync_interval_ms)
    }
}

/// LAN transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanConfig {
    /// Ports tried in order when binding; discovery probes every one of them.
    pub candidate_ports: Vec<u16>,
    pub bind_ip: IpAddr,
    /// Destination address for discovery probes.
    pub broadcast_ip: IpAddr,
    /// Give up on an unanswered join after this long.
    pub join_timeout_ms: u64,
    /// Resend an unanswered JoinRequest this often.
    pub join_retry_ms: u64,
    /// Discovery responses are accepted for this long after a request.
    pub discovery_window_ms: u64,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            candidate_ports: DEFAULT_LAN_PORTS.to_vec(),
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_ip: IpAddr::V4(Ipv4Addr::BROADCAST),
            join_timeout_ms: 5_000,
            join_retry_ms: 500,
            discovery_window_ms: 2_000,
        }
    }
}

impl LanConfig {
    /// Configuration confined to the loopback interface.
    pub fn loopback(candidate_ports: Vec<u16>) -> Self {
        Self {
            candidate_ports,
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            broadcast_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Self::default()
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn join_retry(&self) -> Duration {
        Duration::from_millis(self.join_retry_ms)
    }

    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }
}
