//! The consensus protocol backend: message dispatch, proxy relay and peer
//! lifecycle.
//!
//! The network layer calls [`Backend::handle_msg`] for every inbound message
//! and the registration callbacks on connect/disconnect. Dispatch takes a
//! read guard on the core state only for the admission snapshot (readiness
//! flag and relay slots); decoding, signature verification and all network
//! sends run outside the guard, detached where the protocol allows it.

use crate::chain::{is_last_block_of_epoch, Chain};
use crate::config::NodeConfig;
use crate::error::{ConfigError, HandlerError, NetworkError};
use crate::events::{ConsensusEvent, EventFeeds, MessageEvent};
use crate::network::dedup::RecentMessages;
use crate::network::message::{
    check_validator_signature, opcode, EnodeCertificate, ForwardMessage, Message, MessageError,
};
use crate::network::peer::{Broadcaster, ConsensusPeer, PeerMessage};
use crate::types::{hash_payload, Address, BlockRef, NodeRecord};
use crate::val_enode_table::ValEnodeTable;
use ed25519_dalek::SigningKey;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, error, info, trace, warn};

/// Peers on protocol versions older than this do not understand the
/// announce-version catalog request.
pub const MIN_ANNOUNCE_PROTOCOL_VERSION: u32 = 65;

/// Handler invoked for an announce-family opcode. Registered once at startup
/// by the announce subsystem; every invocation is spawned fire-and-forget.
pub type AnnounceHandler = Arc<
    dyn Fn(Arc<dyn ConsensusPeer>, Vec<u8>) -> BoxFuture<'static, Result<(), NetworkError>>
        + Send
        + Sync,
>;

/// Role of this node within the proxy topology. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Validator,
    Proxy,
    ProxiedValidator,
    Plain,
}

/// Lifecycle and relay state guarded by the coarse core lock.
#[derive(Default)]
struct CoreState {
    started: bool,
    /// The single proxied-validator connection, present only on a proxy.
    proxied_peer: Option<Arc<dyn ConsensusPeer>>,
    /// The single upstream proxy connection, present only on a proxied
    /// validator.
    proxy_peer: Option<Arc<dyn ConsensusPeer>>,
}

pub struct Backend {
    config: NodeConfig,
    proxy_node: Option<NodeRecord>,
    node_key: SigningKey,
    address: Address,
    chain: Arc<dyn Chain>,
    val_enode_table: Arc<dyn ValEnodeTable>,
    core: RwLock<CoreState>,
    recent_messages: RecentMessages,
    announce_handlers: parking_lot::RwLock<HashMap<u8, AnnounceHandler>>,
    feeds: EventFeeds,
    broadcaster: OnceLock<Arc<dyn Broadcaster>>,
    enode_certificate: parking_lot::RwLock<Option<Message>>,
}

impl Backend {
    pub fn new(
        config: NodeConfig,
        node_key: SigningKey,
        chain: Arc<dyn Chain>,
        val_enode_table: Arc<dyn ValEnodeTable>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let proxy_node = if config.is_proxied {
            config.proxy_node()?
        } else {
            None
        };
        let recent_messages =
            RecentMessages::new(config.inmemory_peers, config.inmemory_messages);
        let address = Address::from_public_key(&node_key.verifying_key());

        Ok(Self {
            config,
            proxy_node,
            node_key,
            address,
            chain,
            val_enode_table,
            core: RwLock::new(CoreState::default()),
            recent_messages,
            announce_handlers: parking_lot::RwLock::new(HashMap::new()),
            feeds: EventFeeds::new(),
            broadcaster: OnceLock::new(),
            enode_certificate: parking_lot::RwLock::new(None),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The local validator account address, derived from the node key.
    pub fn validator_address(&self) -> Address {
        self.address
    }

    pub fn is_proxy(&self) -> bool {
        self.config.is_proxy
    }

    pub fn is_proxied_validator(&self) -> bool {
        self.config.is_proxied
    }

    pub async fn role(&self) -> PeerRole {
        if self.config.is_proxy {
            PeerRole::Proxy
        } else if self.config.is_proxied {
            PeerRole::ProxiedValidator
        } else if self.core.read().await.started {
            PeerRole::Validator
        } else {
            PeerRole::Plain
        }
    }

    pub(crate) fn chain(&self) -> &Arc<dyn Chain> {
        &self.chain
    }

    pub(crate) fn val_enode_table(&self) -> &Arc<dyn ValEnodeTable> {
        &self.val_enode_table
    }

    pub(crate) async fn proxied_peer(&self) -> Option<Arc<dyn ConsensusPeer>> {
        self.core.read().await.proxied_peer.clone()
    }

    /// Mark the consensus core started. Readiness transitions are atomic
    /// with respect to in-flight dispatch.
    pub async fn start(&self) {
        self.core.write().await.started = true;
    }

    pub async fn stop(&self) {
        self.core.write().await.started = false;
    }

    pub async fn is_core_started(&self) -> bool {
        self.core.read().await.started
    }

    /// Wire in the multicast collaborator (once-only).
    pub fn set_broadcaster(&self, broadcaster: Arc<dyn Broadcaster>) -> Result<(), String> {
        self.broadcaster
            .set(broadcaster)
            .map_err(|_| "Broadcaster already set".to_string())
    }

    /// Register the async handler for an announce-family opcode.
    pub fn register_announce_handler(&self, code: u8, handler: AnnounceHandler) {
        self.announce_handlers.write().insert(code, handler);
    }

    pub fn subscribe_consensus_events(&self) -> tokio::sync::broadcast::Receiver<ConsensusEvent> {
        self.feeds.subscribe_consensus()
    }

    pub fn subscribe_delegate_sign_events(
        &self,
    ) -> tokio::sync::broadcast::Receiver<MessageEvent> {
        self.feeds.subscribe_delegate_sign()
    }

    fn should_handle_delegate_sign(&self) -> bool {
        self.config.is_proxy || self.config.is_proxied
    }

    /// Entry point for every inbound message delivered by the network layer.
    ///
    /// Returns `Ok(false)` when the opcode is outside the consensus protocol
    /// range (the caller should try its other protocol handlers), `Ok(true)`
    /// when the message was consumed. An `Err` always means the message was
    /// ours but could not be handled; it must not be retried elsewhere.
    pub async fn handle_msg(
        &self,
        sender: Address,
        msg: PeerMessage,
        peer: Arc<dyn ConsensusPeer>,
    ) -> Result<bool, HandlerError> {
        if !opcode::in_range(msg.code) {
            return Ok(false);
        }

        // Admission snapshot under the core lock: readiness and relay slots
        // only. Decode, verification and detached sends run outside it.
        let (core_started, proxied_peer) = {
            let core = self.core.read().await;
            (core.started, core.proxied_peer.clone())
        };

        if msg.code == opcode::CONSENSUS && !core_started && !self.config.is_proxy {
            return Err(HandlerError::EngineStopped);
        }

        let data: Vec<u8> = match bincode::deserialize(&msg.data) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to decode message payload from {}: {}", sender, e);
                return Err(HandlerError::DecodeFailed);
            }
        };

        if msg.code == opcode::DELEGATE_SIGN {
            if self.should_handle_delegate_sign() {
                self.feeds.post_delegate_sign(MessageEvent { payload: data });
                return Ok(true);
            }
            return Err(HandlerError::NoDelegateSignTarget);
        }

        // Only the announce message is gossiped; it alone goes through the
        // recent-message caches. Suppression is content-keyed: the same
        // payload from two senders collapses into one delivery.
        if msg.code == opcode::ANNOUNCE {
            let hash = hash_payload(&data);
            self.recent_messages.mark_peer_message(sender, hash);
            if self.recent_messages.check_and_mark_own(hash) {
                trace!("Dropping already handled announce message from {}", sender);
                return Ok(true);
            }
        }

        if msg.code == opcode::CONSENSUS {
            self.handle_consensus_msg(&peer, proxied_peer, data).await?;
            return Ok(true);
        } else if msg.code == opcode::FWD {
            self.handle_fwd_msg(&peer, proxied_peer, data).await?;
            return Ok(true);
        }

        let handler = self.announce_handlers.read().get(&msg.code).cloned();
        if let Some(handler) = handler {
            // Fire and forget: the handler's outcome never reaches the
            // dispatch caller.
            let code = msg.code;
            tokio::spawn(async move {
                if let Err(e) = handler(peer, data).await {
                    debug!("Announce handler for opcode {:#04x} failed: {}", code, e);
                }
            });
            return Ok(true);
        }

        if msg.code == opcode::VALIDATOR_HANDSHAKE {
            warn!("Received unexpected validator handshake message");
            return Ok(true);
        }

        // An in-range opcode nothing claims is a code/opcode-table mismatch
        // in this build, not a network fault.
        error!(
            "BUG: unhandled consensus protocol opcode {:#04x}",
            msg.code
        );
        Ok(false)
    }

    /// Consensus opcode: verify-and-relay on a proxy, deliver to the local
    /// core everywhere else.
    async fn handle_consensus_msg(
        &self,
        peer: &Arc<dyn ConsensusPeer>,
        proxied_peer: Option<Arc<dyn ConsensusPeer>>,
        payload: Vec<u8>,
    ) -> Result<(), HandlerError> {
        if self.config.is_proxy {
            // Never bounce traffic back to the validator this proxy shields.
            if let Some(proxied) = proxied_peer.as_ref() {
                if proxied.node().id == peer.node().id {
                    warn!(
                        "Got a consensus message from the proxied validator. Ignoring it (from={:?})",
                        peer.node().id
                    );
                    return Ok(());
                }
            }

            // Outside senders must prove validator membership before the relay.
            let head = self.chain.current_block();
            let valset = self.chain.validator_set(head.number, head.hash);
            if let Err(e) = Message::from_verified_payload(&payload, |data, sig| {
                check_validator_signature(&valset, data, sig)
            }) {
                error!("Got a consensus message signed by a non validator: {}", e);
                return Err(HandlerError::NonValidatorMessage);
            }

            if let Some(proxied) = proxied_peer {
                trace!(
                    "Forwarding consensus message to proxied validator (from={:?})",
                    peer.node().id
                );
                tokio::spawn(async move {
                    if let Err(e) = proxied.send(opcode::CONSENSUS, payload).await {
                        debug!(
                            "Failed to relay consensus message to the proxied validator: {}",
                            e
                        );
                    }
                });
            }
        } else {
            // The case when this node is a validator
            self.feeds
                .post_consensus(ConsensusEvent::Message(MessageEvent { payload }));
        }

        Ok(())
    }

    /// Forward opcode: the proxied validator asks its proxy to multicast an
    /// inner consensus message.
    async fn handle_fwd_msg(
        &self,
        peer: &Arc<dyn ConsensusPeer>,
        proxied_peer: Option<Arc<dyn ConsensusPeer>>,
        payload: Vec<u8>,
    ) -> Result<(), HandlerError> {
        if !self.config.is_proxy {
            warn!(
                "Got a forward consensus message and this node is not a proxy. Ignoring it (from={:?})",
                peer.node().id
            );
            return Ok(());
        }

        // Trust derives from the direct transport link, not the envelope:
        // only the registered proxied peer may request a forward.
        let from_proxied = proxied_peer
            .as_ref()
            .is_some_and(|p| p.node().id == peer.node().id);
        if !from_proxied {
            warn!(
                "Got a forward consensus message from a non proxied validator. Ignoring it (from={:?})",
                peer.node().id
            );
            return Ok(());
        }

        // The envelope is unsigned; the wrapped message already carries the
        // proxied validator's signature.
        let envelope = Message::from_payload(&payload).map_err(|e| {
            error!(
                "Failed to decode message from payload (from={:?}): {}",
                peer.node().id,
                e
            );
            e
        })?;
        let fwd = ForwardMessage::from_bytes(&envelope.msg).map_err(|e| {
            error!(
                "Failed to decode a ForwardMessage (from={:?}): {}",
                peer.node().id,
                e
            );
            e
        })?;

        trace!(
            "Forwarding a consensus message to {} destination(s)",
            fwd.dest_addresses.len()
        );
        if let Some(broadcaster) = self.broadcaster.get().cloned() {
            tokio::spawn(async move {
                if let Err(e) = broadcaster
                    .multicast(&fwd.dest_addresses, fwd.msg, opcode::CONSENSUS)
                    .await
                {
                    debug!("Multicast of a forwarded consensus message failed: {}", e);
                }
            });
        } else {
            debug!("No broadcaster wired; dropping forwarded consensus message");
        }

        Ok(())
    }

    /// Connection-registration callback from the network layer.
    pub async fn register_peer(&self, peer: Arc<dyn ConsensusPeer>, is_proxied_peer: bool) {
        trace!(
            "register_peer called (peer={:?}, is_proxied_peer={})",
            peer.node().id,
            is_proxied_peer
        );

        if self.config.is_proxy && is_proxied_peer {
            // Replace wholesale; a stale prior handle is simply dropped
            self.core.write().await.proxied_peer = Some(peer.clone());
        } else if self.config.is_proxied {
            match self.proxy_node {
                Some(expected) if expected.id == peer.node().id => {
                    self.core.write().await.proxy_peer = Some(peer.clone());
                    if let Some(cert_msg) = self.retrieve_enode_certificate_msg() {
                        self.send_enode_certificate_msg(peer.clone(), cert_msg);
                    }
                }
                _ => {
                    error!(
                        "Unauthorized connected peer to the proxied validator (peer={:?})",
                        peer.node().id
                    );
                }
            }
        }

        if peer.version() >= MIN_ANNOUNCE_PROTOCOL_VERSION {
            self.send_get_announce_versions(peer);
        }
    }

    /// Connection-teardown callback. A slot is cleared only when it still
    /// points at the disconnecting peer, so a reconnect is never clobbered
    /// by a stale disconnect event.
    pub async fn unregister_peer(&self, peer: Arc<dyn ConsensusPeer>, is_proxied_peer: bool) {
        let mut core = self.core.write().await;
        if self.config.is_proxy && is_proxied_peer {
            if core
                .proxied_peer
                .as_ref()
                .is_some_and(|p| p.node().id == peer.node().id)
            {
                core.proxied_peer = None;
            }
        } else if self.config.is_proxied
            && core
                .proxy_peer
                .as_ref()
                .is_some_and(|p| p.node().id == peer.node().id)
        {
            core.proxy_peer = None;
        }
    }

    /// Called by the mining loop whenever new work begins on a height.
    pub async fn new_work(&self) -> Result<(), HandlerError> {
        if !self.core.read().await.started {
            return Err(HandlerError::EngineStopped);
        }
        self.feeds.post_consensus(ConsensusEvent::FinalCommitted);
        Ok(())
    }

    /// Called on every new chain head. At the end of an epoch this logs the
    /// local election result and refreshes validator connections.
    pub async fn new_chain_head(&self, block: BlockRef) {
        if !is_last_block_of_epoch(block.number, self.config.epoch) {
            return;
        }

        let started = self.core.read().await.started;
        let valset = self.chain.validator_set(block.number, block.hash);

        if started {
            info!(
                "Validator election results (address={}, elected={}, number={})",
                self.address,
                valset.contains(&self.address),
                block.number
            );
        }

        trace!(
            "At end of epoch and going to refresh validator peers (new_block_number={})",
            block.number
        );
        if let Some(broadcaster) = self.broadcaster.get().cloned() {
            tokio::spawn(async move {
                broadcaster.refresh_validator_peers(&valset).await;
            });
        }
    }

    /// The current signed enode certificate message, if one has been
    /// generated.
    pub fn retrieve_enode_certificate_msg(&self) -> Option<Message> {
        self.enode_certificate.read().clone()
    }

    /// Sign and store the local enode certificate. The handshake send branch
    /// and proxy reconnects resend the stored message.
    pub fn update_enode_certificate(
        &self,
        enode_url: String,
        version: u64,
    ) -> Result<Message, MessageError> {
        let certificate = EnodeCertificate { enode_url, version };
        let mut msg = Message::new(
            opcode::ENODE_CERTIFICATE,
            certificate.to_bytes()?,
            self.address,
        );
        msg.sign(&self.node_key)?;
        *self.enode_certificate.write() = Some(msg.clone());
        Ok(msg)
    }

    /// Like [`Self::update_enode_certificate`], versioned by wall clock.
    /// Unix time is monotonically increasing across restarts, which is all
    /// the freshness check needs.
    pub fn refresh_enode_certificate(&self, enode_url: String) -> Result<Message, MessageError> {
        let version = chrono::Utc::now().timestamp().max(0) as u64;
        self.update_enode_certificate(enode_url, version)
    }

    /// Detached send of an enode certificate message.
    pub(crate) fn send_enode_certificate_msg(&self, peer: Arc<dyn ConsensusPeer>, msg: Message) {
        tokio::spawn(async move {
            match msg.payload() {
                Ok(payload) => {
                    if let Err(e) = peer.send(opcode::ENODE_CERTIFICATE, payload).await {
                        debug!("Failed to send enode certificate message: {}", e);
                    }
                }
                Err(e) => warn!("Failed to encode enode certificate message: {}", e),
            }
        });
    }

    /// Ask a freshly connected peer for its announce-version catalog.
    fn send_get_announce_versions(&self, peer: Arc<dyn ConsensusPeer>) {
        tokio::spawn(async move {
            if let Err(e) = peer.send(opcode::GET_ANNOUNCE_VERSIONS, Vec::new()).await {
                debug!("Failed to request announce versions: {}", e);
            }
        });
    }
}
