//! Transport-facing peer abstractions.
//!
//! The connection layer (framing, encryption, read/write loops) lives in the
//! embedding node; this layer sees peers only through [`ConsensusPeer`] and
//! fans out through [`Broadcaster`].

use crate::chain::ValidatorSet;
use crate::error::NetworkError;
use crate::network::message::MessageError;
use crate::types::{Address, NodeRecord};
use async_trait::async_trait;

/// A raw message delivered by the transport: opcode plus the framed wire
/// payload. `data` decodes to the opaque protocol byte sequence that in turn
/// holds the message envelope.
#[derive(Debug, Clone)]
pub struct PeerMessage {
    pub code: u8,
    pub data: Vec<u8>,
}

impl PeerMessage {
    /// Frame protocol payload bytes the way the transport does.
    pub fn encode(code: u8, payload: &[u8]) -> Result<Self, MessageError> {
        Ok(Self {
            code,
            data: bincode::serialize(&payload.to_vec())?,
        })
    }
}

/// What a connection was established for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerPurpose {
    Any,
    Validator,
    Proxy,
}

/// A live peer connection as seen by the consensus protocol.
#[async_trait]
pub trait ConsensusPeer: Send + Sync {
    /// Send a protocol payload under the given opcode.
    async fn send(&self, code: u8, payload: Vec<u8>) -> Result<(), NetworkError>;

    /// Read exactly one message. Only used during the handshake phase,
    /// before the regular dispatch loop owns the connection.
    async fn read_msg(&self) -> Result<PeerMessage, NetworkError>;

    /// Stable identity of the remote node.
    fn node(&self) -> NodeRecord;

    /// True when the remote side dialed us.
    fn inbound(&self) -> bool;

    /// Whether the connection carries the given purpose flag.
    fn purpose_is_set(&self, purpose: PeerPurpose) -> bool;

    /// Negotiated protocol version.
    fn version(&self) -> u32;
}

/// Outbound fan-out collaborator, wired in once at startup.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Send `payload` under `code` to every listed validator address with a
    /// known connection.
    async fn multicast(
        &self,
        dest_addresses: &[Address],
        payload: Vec<u8>,
        code: u8,
    ) -> Result<(), NetworkError>;

    /// Reconcile validator connections after an election settles.
    async fn refresh_validator_peers(&self, valset: &ValidatorSet);
}
