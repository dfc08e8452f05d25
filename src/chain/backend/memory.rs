// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::{BackendErr, ChainBackend, IndexEntry, WriteSet};
use crate::primitives::{Block, Hash256, SerialPair, Ticket};
use parking_lot::RwLock;
use std::collections::HashMap;
use triomphe::Arc;

#[derive(Default)]
struct MemoryStore {
    blocks: HashMap<Hash256, Block>,
    index: HashMap<Hash256, IndexEntry>,
    tickets: HashMap<SerialPair, Ticket>,
    tip: Option<Hash256>,
}

/// Volatile backend used in `memory_only` mode and in tests. Clones share
/// the same store, which lets tests simulate a restart.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    store: Arc<RwLock<MemoryStore>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn corrupt_ticket(&self, ticket: Ticket) {
        self.store.write().tickets.insert(ticket.serials.clone(), ticket);
    }
}

impl ChainBackend for MemoryBackend {
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, BackendErr> {
        Ok(self.store.read().blocks.get(hash).cloned())
    }

    fn get_index_entry(&self, hash: &Hash256) -> Result<Option<IndexEntry>, BackendErr> {
        Ok(self.store.read().index.get(hash).cloned())
    }

    fn index_entries(&self) -> Result<Vec<IndexEntry>, BackendErr> {
        Ok(self.store.read().index.values().cloned().collect())
    }

    fn tickets(&self) -> Result<Vec<Ticket>, BackendErr> {
        Ok(self.store.read().tickets.values().cloned().collect())
    }

    fn tip(&self) -> Result<Option<Hash256>, BackendErr> {
        Ok(self.store.read().tip)
    }

    fn commit(&self, writes: WriteSet) -> Result<(), BackendErr> {
        let mut store = self.store.write();

        for (hash, block) in writes.blocks {
            store.blocks.entry(hash).or_insert(block);
        }

        for entry in writes.index_entries {
            store.index.insert(entry.hash, entry);
        }

        for serials in writes.removed_tickets {
            store.tickets.remove(&serials);
        }

        for ticket in writes.tickets {
            store.tickets.insert(ticket.serials.clone(), ticket);
        }

        if let Some(tip) = writes.tip {
            store.tip = Some(tip);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainConfig;

    #[test]
    fn clones_share_state() {
        let backend = MemoryBackend::new();
        let other = backend.clone();
        let genesis = Block::genesis(&ChainConfig::regtest());
        let hash = genesis.hash();

        let writes = WriteSet {
            index_entries: vec![IndexEntry::genesis(&genesis, hash)],
            blocks: vec![(hash, genesis.clone())],
            tip: Some(hash),
            ..Default::default()
        };
        assert!(!writes.is_empty());
        backend.commit(writes).unwrap();

        assert_eq!(other.tip().unwrap(), Some(hash));
        assert_eq!(other.get_block(&hash).unwrap(), Some(genesis));
        assert!(other.has_block(&hash).unwrap());
        assert_eq!(other.index_entries().unwrap().len(), 1);
    }
}
