//! Node configuration for the consensus networking layer.
//!
//! The embedding node loads this from its TOML config file (or builds it in
//! code) and hands it to [`crate::network::handler::Backend`]. Role flags are
//! static for the lifetime of the process; reconnecting peers never change
//! the local role.

use crate::error::ConfigError;
use crate::types::NodeRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn default_epoch() -> u64 {
    17280
}

fn default_handshake_timeout_ms() -> u64 {
    5000
}

fn default_inmemory_messages() -> usize {
    1024
}

fn default_inmemory_peers() -> usize {
    40
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node relays consensus traffic on behalf of a proxied validator.
    #[serde(default)]
    pub is_proxy: bool,

    /// This node is a validator reachable only through its designated proxy.
    #[serde(default)]
    pub is_proxied: bool,

    /// Enode URL of the upstream proxy (required when `is_proxied`).
    #[serde(default)]
    pub proxy_enode_url: Option<String>,

    /// Blocks per epoch, used for the end-of-epoch validator peer refresh.
    #[serde(default = "default_epoch")]
    pub epoch: u64,

    /// Handshake window in milliseconds. Tests shrink this; production
    /// leaves the default.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Capacity of each gossip dedup cache, in payload hashes.
    #[serde(default = "default_inmemory_messages")]
    pub inmemory_messages: usize,

    /// Number of remote senders tracked by the per-peer dedup cache.
    #[serde(default = "default_inmemory_peers")]
    pub inmemory_peers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            is_proxy: false,
            is_proxied: false,
            proxy_enode_url: None,
            epoch: default_epoch(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            inmemory_messages: default_inmemory_messages(),
            inmemory_peers: default_inmemory_peers(),
        }
    }
}

impl NodeConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check role consistency. A node is never simultaneously proxy and
    /// proxied validator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_proxy && self.is_proxied {
            return Err(ConfigError::ConflictingRoles);
        }
        if self.is_proxied {
            match &self.proxy_enode_url {
                None => return Err(ConfigError::MissingProxyEnode),
                Some(url) => {
                    NodeRecord::parse_url(url)?;
                }
            }
        }
        Ok(())
    }

    /// The parsed upstream proxy record, when one is configured.
    pub fn proxy_node(&self) -> Result<Option<NodeRecord>, ConfigError> {
        match &self.proxy_enode_url {
            Some(url) => Ok(Some(NodeRecord::parse_url(url)?)),
            None => Ok(None),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
