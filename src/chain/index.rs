// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::ChainWork;
use crate::primitives::{Block, Hash256};
use bincode::{Decode, Encode};
use lru::LruCache;
use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;

/// Lifecycle of a block candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum BlockState {
    Unseen,
    Validating,
    Accepted,
    Rejected,
    Orphan,
}

/// Block index record. Blocks refer to each other by hash only.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct IndexEntry {
    pub hash: Hash256,
    pub parent: Hash256,
    pub height: u64,

    /// Work of the branch up to and including this block
    pub work: ChainWork,
    pub bits: u32,
    pub timestamp: i64,
    pub state: BlockState,
}

impl IndexEntry {
    pub fn genesis(block: &Block, hash: Hash256) -> Self {
        Self {
            hash,
            parent: Hash256::zero(),
            height: 0,
            work: ChainWork::from_bits(block.header.bits),
            bits: block.header.bits,
            timestamp: block.header.timestamp,
            state: BlockState::Accepted,
        }
    }

    pub fn child(parent: &IndexEntry, block: &Block, hash: Hash256) -> Self {
        Self {
            hash,
            parent: parent.hash,
            height: block.header.height,
            work: &parent.work + &ChainWork::from_bits(block.header.bits),
            bits: block.header.bits,
            timestamp: block.header.timestamp,
            state: BlockState::Accepted,
        }
    }
}

/// Hash indexed block graph with the canonical chain laid out by height
#[derive(Debug, Clone)]
pub struct BlockIndex {
    entries: HashMap<Hash256, IndexEntry>,
    children: HashMap<Hash256, Vec<Hash256>>,
    main_chain: Vec<Hash256>,
}

impl BlockIndex {
    pub fn new(genesis: IndexEntry) -> Self {
        let hash = genesis.hash;
        let mut entries = HashMap::new();
        entries.insert(hash, genesis);

        Self {
            entries,
            children: HashMap::new(),
            main_chain: vec![hash],
        }
    }

    pub fn insert(&mut self, entry: IndexEntry) {
        if entry.height > 0 {
            let siblings = self.children.entry(entry.parent).or_default();
            if !siblings.contains(&entry.hash) {
                siblings.push(entry.hash);
            }
        }
        self.entries.insert(entry.hash, entry);
    }

    pub fn get(&self, hash: &Hash256) -> Option<&IndexEntry> {
        self.entries.get(hash)
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn genesis_hash(&self) -> Hash256 {
        self.main_chain[0]
    }

    pub fn tip(&self) -> &IndexEntry {
        let hash = self.main_chain[self.main_chain.len() - 1];
        &self.entries[&hash]
    }

    pub fn height(&self) -> u64 {
        (self.main_chain.len() - 1) as u64
    }

    pub fn main_hash_at(&self, height: u64) -> Option<Hash256> {
        self.main_chain.get(height as usize).copied()
    }

    pub fn is_on_main_chain(&self, hash: &Hash256) -> bool {
        match self.entries.get(hash) {
            Some(entry) => self.main_hash_at(entry.height).as_ref() == Some(hash),
            None => false,
        }
    }

    /// Ancestor of `hash` at `height`
    pub fn ancestor_at(&self, hash: &Hash256, height: u64) -> Option<&IndexEntry> {
        let mut cur = self.entries.get(hash)?;

        if cur.height < height {
            return None;
        }

        while cur.height > height {
            if self.is_on_main_chain(&cur.hash) {
                return self.main_hash_at(height).and_then(|h| self.entries.get(&h));
            }
            cur = self.entries.get(&cur.parent)?;
        }

        Some(cur)
    }

    /// Last main chain block on the path from `hash` back to genesis
    pub fn fork_point(&self, hash: &Hash256) -> Option<&IndexEntry> {
        let mut cur = self.entries.get(hash)?;

        while !self.is_on_main_chain(&cur.hash) {
            cur = self.entries.get(&cur.parent)?;
        }

        Some(cur)
    }

    /// Hashes from just after `fork` up to `hash`, in ascending height order
    pub fn branch_from(&self, fork: &Hash256, hash: &Hash256) -> Option<Vec<Hash256>> {
        let mut out = Vec::new();
        let mut cur = self.entries.get(hash)?;

        while &cur.hash != fork {
            out.push(cur.hash);
            if cur.height == 0 {
                return None;
            }
            cur = self.entries.get(&cur.parent)?;
        }

        out.reverse();
        Some(out)
    }

    /// Make `hash` the canonical tip. The block and all its ancestors must be indexed.
    pub fn set_tip(&mut self, hash: &Hash256) -> bool {
        let fork = match self.fork_point(hash) {
            Some(fork) => fork.clone(),
            None => return false,
        };
        let branch = match self.branch_from(&fork.hash, hash) {
            Some(branch) => branch,
            None => return false,
        };

        self.main_chain.truncate(fork.height as usize + 1);
        self.main_chain.extend(branch);
        true
    }

    /// All known descendants of `hash`, breadth first, excluding `hash` itself
    pub fn descendants(&self, hash: &Hash256) -> Vec<Hash256> {
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(*hash);

        while let Some(next) = queue.pop_front() {
            if let Some(children) = self.children.get(&next) {
                for child in children {
                    out.push(*child);
                    queue.push_back(*child);
                }
            }
        }

        out
    }

    /// Marks `hash` and every descendant as rejected, returning the marked hashes
    pub fn mark_rejected(&mut self, hash: &Hash256) -> Vec<Hash256> {
        let mut marked = vec![*hash];
        marked.extend(self.descendants(hash));

        for h in &marked {
            if let Some(entry) = self.entries.get_mut(h) {
                entry.state = BlockState::Rejected;
            }
        }

        marked
    }

    /// Exponentially spaced main chain hashes, newest first, ending with genesis
    pub fn locator(&self) -> Vec<Hash256> {
        let mut out = Vec::new();
        let mut height = self.height() as i64;
        let mut step = 1;

        while height > 0 {
            out.push(self.main_chain[height as usize]);
            if out.len() >= 10 {
                step *= 2;
            }
            height -= step;
        }

        out.push(self.genesis_hash());
        out
    }

    /// Main chain hashes following the first locator hash we recognise
    pub fn hashes_after_locator(&self, locator: &[Hash256], limit: usize) -> Vec<Hash256> {
        let start = locator
            .iter()
            .find(|h| self.is_on_main_chain(h))
            .and_then(|h| self.entries.get(h))
            .map_or(0, |e| e.height as usize);

        self.main_chain
            .iter()
            .skip(start + 1)
            .take(limit)
            .copied()
            .collect()
    }
}

/// Blocks whose parent is unknown. Bounded, with the oldest entry evicted first.
pub struct OrphanPool {
    blocks: LruCache<Hash256, Block>,
    by_parent: HashMap<Hash256, HashSet<Hash256>>,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN)),
            by_parent: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.blocks.contains(hash)
    }

    /// Parks an orphan, returning the hash of the block evicted to make room
    pub fn insert(&mut self, hash: Hash256, block: Block) -> Option<Hash256> {
        let parent = block.header.prev_hash;
        let evicted = match self.blocks.push(hash, block) {
            Some((old, old_block)) if old != hash => {
                self.unlink(&old_block.header.prev_hash, &old);
                Some(old)
            }
            _ => None,
        };

        self.by_parent.entry(parent).or_default().insert(hash);
        evicted
    }

    /// Removes and returns the orphans waiting on `parent`
    pub fn take_children(&mut self, parent: &Hash256) -> Vec<(Hash256, Block)> {
        let hashes = match self.by_parent.remove(parent) {
            Some(hashes) => hashes,
            None => return vec![],
        };

        let mut out: Vec<_> = hashes
            .into_iter()
            .filter_map(|h| self.blocks.pop(&h).map(|b| (h, b)))
            .collect();
        out.sort_by_key(|(_, b)| b.header.timestamp);
        out
    }

    /// Walks orphan parents back to the first missing ancestor
    pub fn missing_root(&self, hash: &Hash256) -> Option<Hash256> {
        let mut cur = self.blocks.peek(hash)?.header.prev_hash;

        while let Some(block) = self.blocks.peek(&cur) {
            cur = block.header.prev_hash;
        }

        Some(cur)
    }

    fn unlink(&mut self, parent: &Hash256, hash: &Hash256) {
        if let Some(set) = self.by_parent.get_mut(parent) {
            set.remove(hash);
            if set.is_empty() {
                self.by_parent.remove(parent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainConfig;
    use crate::test_util::*;

    /// Builds genesis plus a main chain of `n` blocks and returns the blocks
    fn chain_of(n: usize, tag: u64) -> (BlockIndex, Vec<Block>) {
        let genesis = Block::genesis(&ChainConfig::regtest());
        let mut index = BlockIndex::new(IndexEntry::genesis(&genesis, genesis.hash()));
        let mut blocks = vec![genesis];

        for _ in 0..n {
            let parent = blocks.last().unwrap();
            let block = mine_empty_child(parent, &test_key(1), tag);
            let entry = IndexEntry::child(index.get(&parent.hash()).unwrap(), &block, block.hash());
            index.insert(entry);
            index.set_tip(&block.hash());
            blocks.push(block);
        }

        (index, blocks)
    }

    #[test]
    fn work_accumulates() {
        let (index, blocks) = chain_of(3, 0);
        let genesis = index.get(&blocks[0].hash()).unwrap();
        let tip = index.tip();
        assert_eq!(tip.height, 3);
        assert!(tip.work > genesis.work);
        assert_eq!(
            tip.work,
            ChainWork(genesis.work.0.clone() * ibig::UBig::from(4u8))
        );
    }

    #[test]
    fn it_switches_branches() {
        let (mut index, blocks) = chain_of(3, 0);
        let fork = &blocks[1];
        let side = mine_empty_child(fork, &test_key(2), 1);
        let side_hash = side.hash();
        index.insert(IndexEntry::child(index.get(&fork.hash()).unwrap(), &side, side_hash));

        assert!(!index.is_on_main_chain(&side_hash));
        assert_eq!(index.fork_point(&side_hash).unwrap().hash, fork.hash());
        assert_eq!(index.branch_from(&fork.hash(), &side_hash).unwrap(), vec![side_hash]);
        assert_eq!(index.ancestor_at(&side_hash, 1).unwrap().hash, fork.hash());

        assert!(index.set_tip(&side_hash));
        assert_eq!(index.height(), 2);
        assert!(index.is_on_main_chain(&side_hash));
        assert!(!index.is_on_main_chain(&blocks[3].hash()));
        assert_eq!(index.descendants(&fork.hash()).len(), 3);
    }

    #[test]
    fn rejection_spreads_to_descendants() {
        let (mut index, blocks) = chain_of(3, 0);
        let marked = index.mark_rejected(&blocks[2].hash());
        assert_eq!(marked, vec![blocks[2].hash(), blocks[3].hash()]);
        assert_eq!(index.get(&blocks[3].hash()).unwrap().state, BlockState::Rejected);
        assert_eq!(index.get(&blocks[1].hash()).unwrap().state, BlockState::Accepted);
    }

    #[test]
    fn locator_reaches_genesis() {
        let (index, blocks) = chain_of(14, 0);
        let locator = index.locator();
        assert_eq!(locator[0], blocks[14].hash());
        assert_eq!(*locator.last().unwrap(), blocks[0].hash());
        assert!(locator.len() < 15);

        let after = index.hashes_after_locator(&[blocks[10].hash()], 2);
        assert_eq!(after, vec![blocks[11].hash(), blocks[12].hash()]);

        let unknown = index.hashes_after_locator(&[Hash256::zero()], 1);
        assert_eq!(unknown, vec![blocks[1].hash()]);
    }

    #[test]
    fn orphan_pool_evicts_oldest() {
        let (_, blocks) = chain_of(4, 0);
        let mut pool = OrphanPool::new(2);
        assert_eq!(pool.insert(blocks[2].hash(), blocks[2].clone()), None);
        assert_eq!(pool.insert(blocks[3].hash(), blocks[3].clone()), None);
        assert_eq!(pool.insert(blocks[4].hash(), blocks[4].clone()), Some(blocks[2].hash()));
        assert_eq!(pool.len(), 2);
        assert!(pool.take_children(&blocks[1].hash()).is_empty());

        assert_eq!(pool.missing_root(&blocks[4].hash()), Some(blocks[2].hash()));
        let children = pool.take_children(&blocks[2].hash());
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, blocks[3].hash());
        assert!(!pool.contains(&blocks[3].hash()));
    }
}
