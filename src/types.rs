//! Core identity and chain-reference types shared across the crate.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;

pub type Hash256 = [u8; 32];

/// Hash arbitrary payload bytes into a content key.
pub fn hash_payload(data: &[u8]) -> Hash256 {
    Sha256::digest(data).into()
}

/// A 20-byte validator account address derived from an Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    /// Derive the address payload from a public key (first 20 bytes of SHA256)
    pub fn from_public_key(pubkey: &VerifyingKey) -> Self {
        let digest = Sha256::digest(pubkey.as_bytes());
        let mut payload = [0u8; 20];
        payload.copy_from_slice(&digest[..20]);
        Address(payload)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// Node identity: the 32-byte Ed25519 verifying key of the node's network key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn from_public_key(pubkey: &VerifyingKey) -> Self {
        NodeId(pubkey.to_bytes())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form: the first 4 bytes are enough to tell nodes apart in logs
        write!(f, "NodeId({}..)", hex::encode(&self.0[..4]))
    }
}

/// A node record binding a node identity to a reachable endpoint.
///
/// Rendered as an enode URL: `enode://<64 hex chars>@<ip>:<port>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub endpoint: SocketAddr,
}

impl NodeRecord {
    /// Parse an enode URL into a node record.
    pub fn parse_url(url: &str) -> Result<Self, EnodeUrlError> {
        let rest = url
            .strip_prefix("enode://")
            .ok_or(EnodeUrlError::MissingScheme)?;
        let (id_hex, endpoint) = rest.split_once('@').ok_or(EnodeUrlError::MissingEndpoint)?;

        let id_bytes =
            hex::decode(id_hex).map_err(|e| EnodeUrlError::InvalidNodeId(e.to_string()))?;
        let id: [u8; 32] = id_bytes
            .try_into()
            .map_err(|_| EnodeUrlError::InvalidNodeId("expected 32 bytes".to_string()))?;

        let endpoint: SocketAddr = endpoint
            .parse()
            .map_err(|e: std::net::AddrParseError| EnodeUrlError::InvalidEndpoint(e.to_string()))?;

        Ok(Self {
            id: NodeId(id),
            endpoint,
        })
    }

    pub fn url(&self) -> String {
        format!("enode://{}@{}", self.id, self.endpoint)
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnodeUrlError {
    #[error("Missing enode:// scheme")]
    MissingScheme,
    #[error("Missing @endpoint separator")]
    MissingEndpoint,
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Number and hash of a chain head snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub hash: Hash256,
}
