//! Validator address → enode record table.
//!
//! The handshake reads recorded certificate versions from here and upserts
//! fresh entries. Persistence belongs to the embedding node; this module
//! fixes the lookup/upsert semantics and ships an in-memory implementation
//! for tests and single-process deployments.

use crate::types::{Address, NodeRecord};
use dashmap::DashMap;
use std::collections::HashMap;

/// One table row: where a validator can be reached and how fresh the claim is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressEntry {
    pub node: NodeRecord,
    pub version: u64,
}

pub trait ValEnodeTable: Send + Sync {
    /// The recorded certificate version for an address. `None` when the
    /// address has never been recorded.
    fn get_version_from_address(&self, address: &Address) -> Option<u64>;

    /// Insert or refresh entries. An entry whose version is not greater than
    /// the recorded one is ignored.
    fn upsert(&self, entries: HashMap<Address, AddressEntry>) -> Result<(), String>;
}

#[derive(Default)]
pub struct InMemoryValEnodeTable {
    entries: DashMap<Address, AddressEntry>,
}

impl InMemoryValEnodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<AddressEntry> {
        self.entries.get(address).map(|e| *e.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ValEnodeTable for InMemoryValEnodeTable {
    fn get_version_from_address(&self, address: &Address) -> Option<u64> {
        self.entries.get(address).map(|e| e.version)
    }

    fn upsert(&self, entries: HashMap<Address, AddressEntry>) -> Result<(), String> {
        for (address, entry) in entries {
            match self.entries.entry(address) {
                dashmap::mapref::entry::Entry::Occupied(mut existing) => {
                    if entry.version > existing.get().version {
                        existing.insert(entry);
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(entry);
                }
            }
        }
        Ok(())
    }
}
