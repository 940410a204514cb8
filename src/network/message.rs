//! Wire model for the consensus protocol opcode range.
//!
//! Every protocol message travels as a bincode-encoded [`Message`] envelope
//! carried inside an opaque payload byte sequence. Signatures are detached
//! blobs over the envelope with its signature field emptied, so a signer can
//! be recovered from the payload and the signature alone (see
//! [`crate::crypto`]).

use crate::chain::ValidatorSet;
use crate::crypto;
use crate::types::Address;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Consensus protocol opcodes.
///
/// If you want to add a code, widen `in_range` as well.
pub mod opcode {
    pub const CONSENSUS: u8 = 0x11;
    pub const ANNOUNCE: u8 = 0x12;
    pub const VAL_ENODE_SHARE: u8 = 0x13;
    pub const FWD: u8 = 0x14;
    pub const DELEGATE_SIGN: u8 = 0x15;
    pub const GET_ANNOUNCES: u8 = 0x16;
    pub const GET_ANNOUNCE_VERSIONS: u8 = 0x17;
    pub const ANNOUNCE_VERSIONS: u8 = 0x18;
    pub const ENODE_CERTIFICATE: u8 = 0x19;
    pub const VALIDATOR_HANDSHAKE: u8 = 0x1a;

    /// True for opcodes reserved by the consensus protocol.
    pub fn in_range(code: u8) -> bool {
        (CONSENSUS..=VALIDATOR_HANDSHAKE).contains(&code)
    }
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] crypto::SignatureError),

    #[error("Signer does not match the claimed sender address")]
    SignerMismatch,

    #[error("Message signed by non validator {0}")]
    NonValidatorSigner(Address),
}

/// The protocol message envelope.
///
/// `msg` is the inner payload whose shape depends on `code`; `address` is the
/// claimed sender. An empty `signature` is legal on the wire (handshake
/// placeholders, forward envelopes over a trusted link); whether it is
/// acceptable is decided by the handler, not the codec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub code: u8,
    pub msg: Vec<u8>,
    pub address: Address,
    pub signature: Vec<u8>,
}

impl Message {
    pub fn new(code: u8, msg: Vec<u8>, address: Address) -> Self {
        Self {
            code,
            msg,
            address,
            signature: Vec::new(),
        }
    }

    /// Serialize the full envelope into wire bytes.
    pub fn payload(&self) -> Result<Vec<u8>, MessageError> {
        Ok(bincode::serialize(self)?)
    }

    /// The byte sequence covered by the signature: the envelope with its
    /// signature field emptied.
    fn payload_for_signing(&self) -> Result<Vec<u8>, MessageError> {
        let unsigned = Message {
            signature: Vec::new(),
            ..self.clone()
        };
        Ok(bincode::serialize(&unsigned)?)
    }

    /// Sign the envelope, stamping the sender address derived from the key.
    pub fn sign(&mut self, key: &SigningKey) -> Result<(), MessageError> {
        self.address = Address::from_public_key(&key.verifying_key());
        self.signature.clear();
        let data = self.payload_for_signing()?;
        self.signature = crypto::sign_payload(&data, key);
        Ok(())
    }

    /// Decode an envelope without checking its signature.
    pub fn from_payload(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(bincode::deserialize(payload)?)
    }

    /// Decode an envelope and verify its signature with the given verifier.
    /// The recovered signer must equal the claimed sender address.
    pub fn from_verified_payload<F>(payload: &[u8], verify: F) -> Result<Self, MessageError>
    where
        F: Fn(&[u8], &[u8]) -> Result<Address, MessageError>,
    {
        let msg: Message = bincode::deserialize(payload)?;
        let data = msg.payload_for_signing()?;
        let signer = verify(&data, &msg.signature)?;
        if signer != msg.address {
            return Err(MessageError::SignerMismatch);
        }
        Ok(msg)
    }
}

/// Verify a detached signature and require the signer to be a member of the
/// validator set.
pub fn check_validator_signature(
    valset: &ValidatorSet,
    data: &[u8],
    sig: &[u8],
) -> Result<Address, MessageError> {
    let signer = crypto::recover_signer(data, sig)?;
    if !valset.contains(&signer) {
        return Err(MessageError::NonValidatorSigner(signer));
    }
    Ok(signer)
}

/// Destination list plus the consensus payload to relay. Produced only by a
/// proxied validator, consumed only by its proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardMessage {
    pub dest_addresses: Vec<Address>,
    pub msg: Vec<u8>,
}

impl ForwardMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A signed claim binding a validator to a network endpoint, with a
/// monotonically increasing version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnodeCertificate {
    pub enode_url: String,
    pub version: u64,
}

impl EnodeCertificate {
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
