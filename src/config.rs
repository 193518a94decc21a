// =============================================================================
// MESHCAST CORE — config.rs
// =============================================================================
//
// Node bootstrap configuration, read from JSON with environment overrides:
//
//   MESHCAST_LISTEN     = "0.0.0.0:7890,0.0.0.0:7891"
//   MESHCAST_MAX_PEERS  = "50"
//   MESHCAST_PEERS      = "10.0.0.2:7890,10.0.0.3:7890"
// =============================================================================

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use p256::ecdsa::{SigningKey, VerifyingKey};
use serde::Deserialize;

use crate::constants::{
    ACCEPT_POLL, BODY_GRACE, DEFAULT_MAX_PEERS, DELIVERY_BUFFER, HEADER_POLL, MAX_BODY_LEN,
    OUTBOUND_QUEUE,
};
use crate::error::NetError;
use crate::handler::HandlerConfig;
use crate::identity::{signing_key_from_hex, verifying_key_from_hex, Identity, KeyTable};
use crate::node::Node;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityEntry {
    pub id: String,
    /// Hex SEC1 point
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    /// Hex P-256 scalar
    pub private_key: String,
    #[serde(default = "default_listen")]
    pub listen: Vec<SocketAddr>,
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub identities: Vec<IdentityEntry>,

    #[serde(default = "default_header_poll_ms")]
    pub header_poll_ms: u64,
    #[serde(default = "default_body_timeout_ms")]
    pub body_timeout_ms: u64,
    #[serde(default = "default_accept_poll_ms")]
    pub accept_poll_ms: u64,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    #[serde(default = "default_delivery_buffer")]
    pub delivery_buffer: usize,
    #[serde(default = "default_max_body_len")]
    pub max_body_len: usize,
    /// 0 disables keepalive pings
    #[serde(default)]
    pub ping_interval_ms: u64,
}

fn default_listen() -> Vec<SocketAddr> {
    vec![SocketAddr::from(([0, 0, 0, 0], 7890))]
}
fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}
fn default_header_poll_ms() -> u64 {
    HEADER_POLL.as_millis() as u64
}
fn default_body_timeout_ms() -> u64 {
    BODY_GRACE.as_millis() as u64
}
fn default_accept_poll_ms() -> u64 {
    ACCEPT_POLL.as_millis() as u64
}
fn default_outbound_queue() -> usize {
    OUTBOUND_QUEUE
}
fn default_delivery_buffer() -> usize {
    DELIVERY_BUFFER
}
fn default_max_body_len() -> usize {
    MAX_BODY_LEN
}

impl NodeConfig {
    pub fn from_json(raw: &str) -> Result<Self, NetError> {
        let cfg: NodeConfig =
            serde_json::from_str(raw).map_err(|e| NetError::InvalidConfig(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads the file, applies environment overrides, validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NetError> {
        let raw = std::fs::read_to_string(path)?;
        let mut cfg: NodeConfig =
            serde_json::from_str(&raw).map_err(|e| NetError::InvalidConfig(e.to_string()))?;
        cfg.apply_overrides(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), NetError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("MESHCAST_LISTEN") {
            self.listen = split_list(&raw)
                .map(|s| {
                    s.parse()
                        .map_err(|e| NetError::InvalidConfig(format!("MESHCAST_LISTEN {:?}: {}", s, e)))
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(raw) = lookup("MESHCAST_MAX_PEERS") {
            self.max_peers = raw
                .trim()
                .parse()
                .map_err(|e| NetError::InvalidConfig(format!("MESHCAST_MAX_PEERS {:?}: {}", raw, e)))?;
        }
        if let Some(raw) = lookup("MESHCAST_PEERS") {
            self.peers = split_list(&raw).map(str::to_string).collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.max_peers < 1 {
            return Err(NetError::InvalidConfig("max_peers must be at least 1".into()));
        }
        if self.listen.is_empty() && self.peers.is_empty() {
            return Err(NetError::InvalidConfig("nothing to listen on or dial".into()));
        }
        if self.header_poll_ms == 0 || self.accept_poll_ms == 0 || self.body_timeout_ms == 0 {
            return Err(NetError::InvalidConfig("poll intervals and timeouts must be positive".into()));
        }
        if self.max_body_len == 0 || self.max_body_len > i32::MAX as usize {
            return Err(NetError::InvalidConfig(format!("max_body_len out of range: {}", self.max_body_len)));
        }
        Ok(())
    }

    pub fn identity(&self) -> Result<Identity, NetError> {
        self.node_id.parse()
    }

    pub fn signing_key(&self) -> Result<SigningKey, NetError> {
        signing_key_from_hex(&self.private_key)
    }

    pub fn key_table(&self) -> Result<KeyTable, NetError> {
        self.identities
            .iter()
            .map(|entry| -> Result<(Identity, VerifyingKey), NetError> {
                Ok((entry.id.parse()?, verifying_key_from_hex(&entry.public_key)?))
            })
            .collect()
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            header_poll: Duration::from_millis(self.header_poll_ms),
            body_timeout: Duration::from_millis(self.body_timeout_ms),
            max_body_len: self.max_body_len,
        }
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }

    pub fn build_node(&self) -> Result<Node, NetError> {
        Ok(Node::new(self.identity()?, self.signing_key()?, self.max_peers, self.key_table()?)?
            .with_outbound_queue(self.outbound_queue))
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}
