//! Shared mock collaborators for the protocol scenario tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bftgate::{
    Address, Backend, BlockRef, Broadcaster, Chain, ConsensusPeer, Hash256, InMemoryValEnodeTable,
    NetworkError, NodeConfig, NodeId, NodeRecord, PeerMessage, PeerPurpose, ValidatorSet,
};
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Opt-in log output while debugging a test: TEST_LOG=debug cargo test
fn init_tracing() {
    TRACING.call_once(|| {
        if let Ok(filter) = std::env::var("TEST_LOG") {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_test_writer()
                .init();
        }
    });
}

/// Deterministic node key for tests.
pub fn test_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn address_of(key: &SigningKey) -> Address {
    Address::from_public_key(&key.verifying_key())
}

pub fn node_record_of(key: &SigningKey, port: u16) -> NodeRecord {
    NodeRecord {
        id: NodeId::from_public_key(&key.verifying_key()),
        endpoint: format!("127.0.0.1:{}", port).parse().unwrap(),
    }
}

/// Fixed chain view: one head, one validator set.
pub struct MockChain {
    pub head: BlockRef,
    pub validators: ValidatorSet,
}

impl MockChain {
    pub fn new(validators: Vec<Address>) -> Self {
        Self {
            head: BlockRef {
                number: 1,
                hash: [0xab; 32],
            },
            validators: ValidatorSet::new(validators),
        }
    }
}

impl Chain for MockChain {
    fn current_block(&self) -> BlockRef {
        self.head
    }

    fn validator_set(&self, _number: u64, _hash: Hash256) -> ValidatorSet {
        self.validators.clone()
    }
}

/// Scripted peer connection: records sends, replays queued reads.
pub struct MockPeer {
    node: NodeRecord,
    inbound: bool,
    validator_purpose: bool,
    version: u32,
    stall_reads: bool,
    sent: Mutex<Vec<(u8, Vec<u8>)>>,
    read_queue: Mutex<VecDeque<PeerMessage>>,
}

impl MockPeer {
    pub fn new(id_byte: u8) -> Self {
        Self {
            node: NodeRecord {
                id: NodeId([id_byte; 32]),
                endpoint: format!("127.0.0.1:{}", 30000 + id_byte as u16).parse().unwrap(),
            },
            inbound: true,
            validator_purpose: false,
            // Old protocol version by default so registration does not issue
            // announce-version requests in unrelated tests
            version: 64,
            stall_reads: false,
            sent: Mutex::new(Vec::new()),
            read_queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_node(mut self, node: NodeRecord) -> Self {
        self.node = node;
        self
    }

    pub fn with_inbound(mut self, inbound: bool) -> Self {
        self.inbound = inbound;
        self
    }

    pub fn with_validator_purpose(mut self) -> Self {
        self.validator_purpose = true;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_read(self, msg: PeerMessage) -> Self {
        self.read_queue.lock().push_back(msg);
        self
    }

    /// Reads never resolve; used to drive the handshake into its timeout.
    pub fn with_stalled_reads(mut self) -> Self {
        self.stall_reads = true;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn sent(&self) -> Vec<(u8, Vec<u8>)> {
        self.sent.lock().clone()
    }

    pub fn sent_with_code(&self, code: u8) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| *c == code)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Wait until at least `count` messages with `code` were sent.
    pub async fn wait_for_sends(&self, code: u8, count: usize) -> Vec<Vec<u8>> {
        for _ in 0..200 {
            let matching = self.sent_with_code(code);
            if matching.len() >= count {
                return matching;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "peer {:?} never sent {} message(s) with code {:#04x}; sent: {:?}",
            self.node.id,
            count,
            code,
            self.sent()
                .iter()
                .map(|(c, _)| format!("{:#04x}", c))
                .collect::<Vec<_>>()
        );
    }
}

#[async_trait]
impl ConsensusPeer for MockPeer {
    async fn send(&self, code: u8, payload: Vec<u8>) -> Result<(), NetworkError> {
        self.sent.lock().push((code, payload));
        Ok(())
    }

    async fn read_msg(&self) -> Result<PeerMessage, NetworkError> {
        if self.stall_reads {
            std::future::pending::<()>().await;
        }
        self.read_queue.lock().pop_front().ok_or(NetworkError::Closed)
    }

    fn node(&self) -> NodeRecord {
        self.node
    }

    fn inbound(&self) -> bool {
        self.inbound
    }

    fn purpose_is_set(&self, purpose: PeerPurpose) -> bool {
        match purpose {
            PeerPurpose::Any => true,
            PeerPurpose::Validator => self.validator_purpose,
            PeerPurpose::Proxy => false,
        }
    }

    fn version(&self) -> u32 {
        self.version
    }
}

/// Recording fan-out collaborator.
#[derive(Default)]
pub struct MockBroadcaster {
    multicasts: Mutex<Vec<(Vec<Address>, Vec<u8>, u8)>>,
    refreshes: Mutex<usize>,
}

impl MockBroadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn multicasts(&self) -> Vec<(Vec<Address>, Vec<u8>, u8)> {
        self.multicasts.lock().clone()
    }

    pub fn refresh_count(&self) -> usize {
        *self.refreshes.lock()
    }

    pub async fn wait_for_multicasts(&self, count: usize) -> Vec<(Vec<Address>, Vec<u8>, u8)> {
        for _ in 0..200 {
            let seen = self.multicasts();
            if seen.len() >= count {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("broadcaster never saw {} multicast(s)", count);
    }
}

#[async_trait]
impl Broadcaster for MockBroadcaster {
    async fn multicast(
        &self,
        dest_addresses: &[Address],
        payload: Vec<u8>,
        code: u8,
    ) -> Result<(), NetworkError> {
        self.multicasts
            .lock()
            .push((dest_addresses.to_vec(), payload, code));
        Ok(())
    }

    async fn refresh_validator_peers(&self, _valset: &ValidatorSet) {
        *self.refreshes.lock() += 1;
    }
}

/// A backend over mock chain state and an in-memory enode table.
pub fn new_backend(
    config: NodeConfig,
    node_key: SigningKey,
    validators: Vec<Address>,
) -> (Arc<Backend>, Arc<InMemoryValEnodeTable>) {
    init_tracing();
    let table = Arc::new(InMemoryValEnodeTable::new());
    let chain = Arc::new(MockChain::new(validators));
    let backend = Backend::new(config, node_key, chain, table.clone()).unwrap();
    (Arc::new(backend), table)
}

pub fn proxy_config() -> NodeConfig {
    NodeConfig {
        is_proxy: true,
        ..NodeConfig::default()
    }
}

pub fn proxied_config(proxy: &NodeRecord) -> NodeConfig {
    NodeConfig {
        is_proxied: true,
        proxy_enode_url: Some(proxy.url()),
        ..NodeConfig::default()
    }
}

/// Wire frame around protocol payload bytes, as the transport produces it.
pub fn frame(code: u8, payload: &[u8]) -> PeerMessage {
    PeerMessage::encode(code, payload).unwrap()
}

/// A frame whose payload cannot be decoded.
pub fn garbage_frame(code: u8) -> PeerMessage {
    PeerMessage {
        code,
        data: vec![0xff, 0xff, 0xff],
    }
}

/// Let already spawned fire-and-forget tasks settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
