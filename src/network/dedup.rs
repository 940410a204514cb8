//! Gossip deduplication caches.
//!
//! Only the announce opcode is gossiped, and it alone flows through these
//! caches. Two independent bounded LRU caches: one keyed by remote sender
//! (which peers have seen which payloads, consulted by the gossip send path
//! to avoid echoing a message back) and one process-wide self cache (which
//! payloads this node has already handled, regardless of sender). Capacity
//! eviction only; there is no TTL.

use crate::types::{Address, Hash256};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub struct RecentMessages {
    per_peer: Mutex<LruCache<Address, LruCache<Hash256, ()>>>,
    own: Mutex<LruCache<Hash256, ()>>,
    messages_capacity: NonZeroUsize,
}

impl RecentMessages {
    /// `peers` bounds how many senders are tracked, `messages` bounds the
    /// hashes kept per sender and in the self cache.
    pub fn new(peers: usize, messages: usize) -> Self {
        let peers = NonZeroUsize::new(peers).unwrap_or(NonZeroUsize::MIN);
        let messages_capacity = NonZeroUsize::new(messages).unwrap_or(NonZeroUsize::MIN);
        Self {
            per_peer: Mutex::new(LruCache::new(peers)),
            own: Mutex::new(LruCache::new(messages_capacity)),
            messages_capacity,
        }
    }

    /// Record `hash` as seen by `sender`. Idempotent; the sender's cache is
    /// created lazily on its first announce.
    pub fn mark_peer_message(&self, sender: Address, hash: Hash256) {
        let mut per_peer = self.per_peer.lock();
        match per_peer.get_mut(&sender) {
            Some(cache) => {
                cache.put(hash, ());
            }
            None => {
                let mut cache = LruCache::new(self.messages_capacity);
                cache.put(hash, ());
                per_peer.put(sender, cache);
            }
        }
    }

    /// Whether `sender` is known to have seen `hash`.
    pub fn peer_has_seen(&self, sender: &Address, hash: &Hash256) -> bool {
        self.per_peer
            .lock()
            .get_mut(sender)
            .is_some_and(|cache| cache.contains(hash))
    }

    /// Record `hash` in the self cache. Returns true when it was already
    /// present, i.e. the payload has been handled before under any sender.
    pub fn check_and_mark_own(&self, hash: Hash256) -> bool {
        let mut own = self.own.lock();
        if own.contains(&hash) {
            return true;
        }
        own.put(hash, ());
        false
    }
}
