//! Validator handshake: one signed exchange per new connection.
//!
//! The dialing side sends its enode certificate (or an empty placeholder if
//! it declines to identify itself); the receiving side reads and verifies.
//! The active branch races a single timer; the first of error, result or
//! timer expiry decides the outcome, and a late branch is dropped together
//! with the connection.

use crate::crypto;
use crate::error::HandshakeError;
use crate::network::handler::Backend;
use crate::network::message::{opcode, EnodeCertificate, Message, MessageError};
use crate::network::peer::{ConsensusPeer, PeerPurpose};
use crate::types::{Address, NodeRecord};
use crate::val_enode_table::AddressEntry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

impl Backend {
    /// Run the validator handshake with a newly connected peer.
    ///
    /// Returns whether the peer proved it is a validator. Soft negatives
    /// (anonymous peer, stale certificate, either side outside the validator
    /// set) are `Ok(false)`; only protocol violations and the timeout are
    /// errors.
    pub async fn handshake(
        &self,
        peer: Arc<dyn ConsensusPeer>,
    ) -> Result<bool, HandshakeError> {
        // Only the initiating side sends; the receiving side reads
        let branch = async {
            if peer.inbound() {
                self.read_validator_handshake_message(&peer).await
            } else {
                self.send_validator_handshake_message(&peer).await
            }
        };

        tokio::select! {
            outcome = branch => outcome,
            _ = tokio::time::sleep(self.config().handshake_timeout()) => {
                Err(HandshakeError::ReadTimeout)
            }
        }
    }

    /// Send branch. When the connection asserts validator purpose, identify
    /// with the current enode certificate; otherwise send an empty message
    /// so the handshake still completes transport-wise.
    async fn send_validator_handshake_message(
        &self,
        peer: &Arc<dyn ConsensusPeer>,
    ) -> Result<bool, HandshakeError> {
        let peer_is_validator = peer.purpose_is_set(PeerPurpose::Validator);

        let msg = if peer_is_validator {
            // May legitimately be None when no certificate exists yet
            self.retrieve_enode_certificate_msg()
        } else {
            None
        };
        let msg = msg.unwrap_or_default();

        let payload = msg.payload()?;
        peer.send(opcode::VALIDATOR_HANDSHAKE, payload).await?;
        Ok(peer_is_validator)
    }

    /// Read branch: read exactly one message and work out whether the peer
    /// proved validator identity.
    async fn read_validator_handshake_message(
        &self,
        peer: &Arc<dyn ConsensusPeer>,
    ) -> Result<bool, HandshakeError> {
        let peer_msg = peer.read_msg().await?;
        if peer_msg.code != opcode::VALIDATOR_HANDSHAKE {
            warn!("Read incorrect message code (code={:#04x})", peer_msg.code);
            return Err(HandshakeError::IncorrectMessageCode);
        }

        let payload: Vec<u8> =
            bincode::deserialize(&peer_msg.data).map_err(MessageError::from)?;

        let msg = Message::from_verified_payload(&payload, verify_handshake_signature)?;

        // An empty signature means the peer decided not to reveal its info
        if msg.signature.is_empty() {
            return Ok(false);
        }

        let certificate = EnodeCertificate::from_bytes(&msg.msg)
            .map_err(|e| HandshakeError::CertificateDecode(e.to_string()))?;
        let node = NodeRecord::parse_url(&certificate.enode_url)?;

        // Bind the claimed identity to the transport identity
        if node.id != peer.node().id {
            warn!(
                "Peer provided incorrect node ID in enode certificate (certificate={}, peer={})",
                certificate.enode_url,
                peer.node().url()
            );
            return Err(HandshakeError::IncorrectNodeInCertificate);
        }

        let head = self.chain().current_block();
        let valset = self.chain().validator_set(head.number, head.hash);
        if !valset.contains(&self.validator_address()) {
            trace!("This validator is not in the validator set");
            return Ok(false);
        }
        if !valset.contains(&msg.address) {
            debug!(
                "Received a validator handshake message from peer not in the validator set (address={})",
                msg.address
            );
            return Ok(false);
        }

        // A certificate no fresher than the recorded one proves nothing.
        // An address with no record is fine: any version is news then.
        if let Some(known_version) = self
            .val_enode_table()
            .get_version_from_address(&msg.address)
        {
            if certificate.version <= known_version {
                debug!(
                    "Received a validator handshake message with an old version (received={}, known={})",
                    certificate.version, known_version
                );
                return Ok(false);
            }
        }

        // A proxy never owns validator address records. Pass the message on
        // to the proxied validator, which makes the admission decision and
        // sends the certificate back if this proxy should record it.
        if self.is_proxy() {
            if let Some(proxied) = self.proxied_peer().await {
                self.send_enode_certificate_msg(proxied, msg);
            }
            return Ok(false);
        }

        // Both sides are validators: record where the peer can be reached
        self.val_enode_table()
            .upsert(HashMap::from([(
                msg.address,
                AddressEntry {
                    node,
                    version: certificate.version,
                },
            )]))
            .map_err(HandshakeError::Table)?;
        Ok(true)
    }
}

/// Signature verifier that tolerates an absent signature: an empty signature
/// recovers the zero address instead of failing, and the caller checks for
/// anonymity explicitly afterwards.
fn verify_handshake_signature(data: &[u8], sig: &[u8]) -> Result<Address, MessageError> {
    if sig.is_empty() {
        return Ok(Address::ZERO);
    }
    Ok(crypto::recover_signer(data, sig)?)
}
