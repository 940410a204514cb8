//! Event feeds connecting the networking layer to the consensus core.

use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A decoded message payload handed to a subscriber.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub payload: Vec<u8>,
}

/// Events published on the consensus feed.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// A consensus protocol message addressed to the local validator.
    Message(MessageEvent),
    /// A height was committed; mining may begin on the next one.
    FinalCommitted,
}

/// Broadcast feeds for consensus and delegate-sign events.
///
/// Posting never blocks. With no live subscribers the event is dropped,
/// which is normal during startup and shutdown.
pub struct EventFeeds {
    consensus: broadcast::Sender<ConsensusEvent>,
    delegate_sign: broadcast::Sender<MessageEvent>,
}

impl Default for EventFeeds {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFeeds {
    pub fn new() -> Self {
        let (consensus, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (delegate_sign, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            consensus,
            delegate_sign,
        }
    }

    pub fn subscribe_consensus(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.consensus.subscribe()
    }

    pub fn subscribe_delegate_sign(&self) -> broadcast::Receiver<MessageEvent> {
        self.delegate_sign.subscribe()
    }

    pub(crate) fn post_consensus(&self, event: ConsensusEvent) {
        if self.consensus.send(event).is_err() {
            debug!("No subscribers on the consensus event feed");
        }
    }

    pub(crate) fn post_delegate_sign(&self, event: MessageEvent) {
        if self.delegate_sign.send(event).is_err() {
            debug!("No subscribers on the delegate-sign event feed");
        }
    }
}
