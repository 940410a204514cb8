//! Chain-state collaborators consumed by the networking layer.
//!
//! The actual chain (block storage, election results) lives in the embedding
//! node. This layer only ever asks two questions: what is the current head,
//! and who are the validators at a given block.

use crate::types::{Address, BlockRef, Hash256};
use std::collections::HashSet;

/// The validator set computed at a specific block.
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    members: HashSet<Address>,
}

impl ValidatorSet {
    pub fn new(members: impl IntoIterator<Item = Address>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Read-only view of chain state.
///
/// Implementations are internally synchronized; this layer never assumes it
/// holds the only reference.
pub trait Chain: Send + Sync {
    /// The current chain head.
    fn current_block(&self) -> BlockRef;

    /// The validator set at the given block.
    fn validator_set(&self, number: u64, hash: Hash256) -> ValidatorSet;
}

/// True on the last block of an epoch, when validator elections settle.
pub fn is_last_block_of_epoch(number: u64, epoch: u64) -> bool {
    epoch != 0 && (number + 1) % epoch == 0
}
