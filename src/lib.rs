//! Message routing and peer authentication for the networking boundary of a
//! BFT consensus engine.
//!
//! The crate classifies inbound peer-to-peer messages by opcode, enforces
//! who may send which message type, deduplicates gossiped announce traffic,
//! relays consensus messages between a proxy and the validator it shields,
//! and runs the signed validator handshake. The consensus core itself, the
//! transport, and persistent storage are collaborators behind traits; see
//! [`network::handler::Backend`] for the wiring surface.

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod network;
pub mod types;
pub mod val_enode_table;

pub use chain::{Chain, ValidatorSet};
pub use config::NodeConfig;
pub use error::{ConfigError, HandlerError, HandshakeError, NetworkError};
pub use events::{ConsensusEvent, EventFeeds, MessageEvent};
pub use network::handler::{AnnounceHandler, Backend, PeerRole, MIN_ANNOUNCE_PROTOCOL_VERSION};
pub use network::message::{
    opcode, EnodeCertificate, ForwardMessage, Message, MessageError,
};
pub use network::peer::{Broadcaster, ConsensusPeer, PeerMessage, PeerPurpose};
pub use types::{Address, BlockRef, Hash256, NodeId, NodeRecord};
pub use val_enode_table::{AddressEntry, InMemoryValEnodeTable, ValEnodeTable};
