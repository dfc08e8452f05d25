// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Chain state manager.
//!
//! Ledger, block index, orphan pool and mempool live behind a single
//! `RwLock`. Block application and reorganisation hold the write lock for the
//! whole apply or rollback sequence, so readers never observe a partially
//! applied block. Proof of work and signature checks run before the lock is
//! taken.

use crate::chain::*;
use crate::consensus::*;
use crate::node::{Mempool, MempoolErr, MempoolInfo};
use crate::primitives::*;
use log::*;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::watch;

/// Bytes kept free in a template for the header and coinbase
const TEMPLATE_RESERVED_BYTES: usize = 1_000;

/// Default max number of parked orphan blocks
pub const DEFAULT_ORPHAN_CAPACITY: usize = 100;

/// Max hashes returned for a single locator query
pub const MAX_BLOCKS_PER_INV: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipInfo {
    pub hash: Hash256,
    pub height: u64,
    pub work: ChainWork,
    pub timestamp: i64,
    pub bits: u32,
}

impl From<&IndexEntry> for TipInfo {
    fn from(entry: &IndexEntry) -> Self {
        Self {
            hash: entry.hash,
            height: entry.height,
            work: entry.work.clone(),
            timestamp: entry.timestamp,
            bits: entry.bits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Appended to the canonical tip
    Extended,

    /// Became the tip of a heavier branch, replacing `disconnected` old blocks
    Reorganized {
        depth: usize,
        disconnected: Vec<Hash256>,
    },

    /// Stored on a branch with no more work than the tip
    SideChain,

    /// Parked until `missing` arrives
    Orphan { missing: Hash256 },

    Duplicate,
}

impl BlockOutcome {
    /// Whether the canonical tip moved
    pub fn is_new_tip(&self) -> bool {
        matches!(self, Self::Extended | Self::Reorganized { .. })
    }
}

/// Where a transaction stands relative to the best chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed {
        tx: Transaction,
        block_hash: Hash256,
        height: u64,
        confirmations: u64,
    },

    /// Waiting in the mempool
    Pending(Transaction),

    /// Neither confirmed on the best chain nor pooled
    Unknown,
}

/// Result of [`Chain::process_block`]
#[derive(Debug, Clone)]
pub struct Processed {
    pub hash: Hash256,
    pub outcome: BlockOutcome,

    /// Orphans connected as a consequence, in processing order
    pub adopted: Vec<(Hash256, BlockOutcome)>,
}

#[derive(Debug)]
pub enum ChainErr {
    Block(BlockVerifyErr),
    Ledger(LedgerErr),

    /// The block or one of its ancestors was already rejected
    KnownInvalid,
    Backend(BackendErr),

    /// Chain state can no longer be trusted
    Fatal(&'static str),
}

impl ChainErr {
    /// The node halts on these
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Fatal(_))
    }

    /// Misbehaviour score for the peer that relayed the offending block
    pub fn ban_score(&self) -> u32 {
        match self {
            Self::Block(BlockVerifyErr::InvalidPoW) => 50,
            Self::Block(BlockVerifyErr::TimestampTooFarInFuture) => 0,
            Self::Block(BlockVerifyErr::InvalidParent) => 0,
            Self::Block(_) | Self::Ledger(_) => 20,
            Self::KnownInvalid | Self::Backend(_) | Self::Fatal(_) => 0,
        }
    }
}

impl fmt::Display for ChainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(err) => write!(f, "invalid block: {err}"),
            Self::Ledger(err) => write!(f, "block rejected by ledger: {err}"),
            Self::KnownInvalid => f.write_str("block previously rejected"),
            Self::Backend(err) => write!(f, "backend: {err}"),
            Self::Fatal(err) => write!(f, "fatal: {err}"),
        }
    }
}

impl From<BlockVerifyErr> for ChainErr {
    fn from(other: BlockVerifyErr) -> Self {
        Self::Block(other)
    }
}

impl From<LedgerErr> for ChainErr {
    fn from(other: LedgerErr) -> Self {
        Self::Ledger(other)
    }
}

impl From<BackendErr> for ChainErr {
    fn from(other: BackendErr) -> Self {
        Self::Backend(other)
    }
}

/// Tunables that are not consensus rules
#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub orphan_capacity: usize,
    pub mempool_capacity: usize,
    pub mempool_expiry: i64,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            orphan_capacity: DEFAULT_ORPHAN_CAPACITY,
            mempool_capacity: crate::node::DEFAULT_MEMPOOL_CAPACITY,
            mempool_expiry: crate::node::DEFAULT_MEMPOOL_EXPIRY,
        }
    }
}

struct ChainState {
    ledger: Ledger,
    index: BlockIndex,
    orphans: OrphanPool,
    mempool: Mempool,
}

pub struct Chain<B: ChainBackend> {
    config: ChainConfig,
    backend: B,
    state: RwLock<ChainState>,
    validating: Mutex<HashSet<Hash256>>,
    tip_sender: watch::Sender<TipInfo>,
}

/// Removes a hash from the validating set when dropped
struct ValidatingGuard<'a> {
    set: &'a Mutex<HashSet<Hash256>>,
    hash: Hash256,
}

impl Drop for ValidatingGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.hash);
    }
}

impl<B: ChainBackend> Chain<B> {
    /// Opens the chain on top of `backend`. A fresh backend is initialised with
    /// genesis. Otherwise the ledger is rebuilt by replaying the canonical chain
    /// and checked against the persisted ticket snapshot.
    pub fn new(config: ChainConfig, backend: B, options: ChainOptions) -> Result<Self, ChainErr> {
        let (genesis, genesis_hash) = crate::global::get_cached_genesis(&config);
        let mut ledger = Ledger::new(config.coinbase_maturity);

        let index = match backend.tip()? {
            None => {
                ledger.apply(&genesis, &genesis_hash)?;
                let entry = IndexEntry::genesis(&genesis, genesis_hash);
                backend.commit(WriteSet {
                    blocks: vec![(genesis_hash, (*genesis).clone())],
                    index_entries: vec![entry.clone()],
                    tip: Some(genesis_hash),
                    ..Default::default()
                })?;
                info!("Initialised {} chain with genesis {}", config.network_name(), genesis_hash);
                BlockIndex::new(entry)
            }

            Some(tip) => Self::replay(&backend, &genesis, genesis_hash, tip, &mut ledger)?,
        };

        let mempool = Mempool::new(options.mempool_capacity, options.mempool_expiry);
        let (tip_sender, _) = watch::channel(TipInfo::from(index.tip()));

        Ok(Self {
            config,
            backend,
            state: RwLock::new(ChainState {
                ledger,
                index,
                orphans: OrphanPool::new(options.orphan_capacity),
                mempool,
            }),
            validating: Mutex::new(HashSet::new()),
            tip_sender,
        })
    }

    fn replay(
        backend: &B,
        genesis: &Block,
        genesis_hash: Hash256,
        tip: Hash256,
        ledger: &mut Ledger,
    ) -> Result<BlockIndex, ChainErr> {
        let entries = backend.index_entries()?;
        let stored_genesis = backend
            .get_index_entry(&genesis_hash)?
            .ok_or(ChainErr::Fatal("stored chain belongs to a different network"))?;

        let mut index = BlockIndex::new(stored_genesis);
        for entry in entries {
            if entry.hash != genesis_hash {
                index.insert(entry);
            }
        }

        if !index.set_tip(&tip) {
            return Err(ChainErr::Fatal("persisted tip is not connected to genesis"));
        }

        info!("Replaying {} blocks", index.height() + 1);

        for height in 0..=index.height() {
            let hash = index
                .main_hash_at(height)
                .ok_or(ChainErr::Fatal("canonical chain has a gap"))?;
            let block = if height == 0 {
                genesis.clone()
            } else {
                backend
                    .get_block(&hash)?
                    .ok_or(ChainErr::Fatal("canonical block missing from store"))?
            };

            ledger
                .apply_verified(&block, &hash)
                .map_err(|_| ChainErr::Fatal("stored canonical block failed to apply"))?;
        }

        let stored: HashMap<SerialPair, Ticket> = backend
            .tickets()?
            .into_iter()
            .map(|t| (t.serials.clone(), t))
            .collect();

        let matches = stored.len() == ledger.ticket_count()
            && ledger.tickets().all(|t| stored.get(&t.serials) == Some(t));

        if !matches {
            return Err(ChainErr::Fatal("ticket snapshot does not match replayed ledger"));
        }

        info!("Chain loaded at height {} tip {}", index.height(), tip);
        Ok(index)
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Receives the new tip every time it changes
    pub fn subscribe(&self) -> watch::Receiver<TipInfo> {
        self.tip_sender.subscribe()
    }

    pub fn tip(&self) -> TipInfo {
        TipInfo::from(self.state.read().index.tip())
    }

    pub fn height(&self) -> u64 {
        self.state.read().index.height()
    }

    pub fn best_block_hash(&self) -> Hash256 {
        self.state.read().index.tip().hash
    }

    pub fn balance_of(&self, address: &Address) -> Money {
        self.state.read().ledger.balance_of(address)
    }

    pub fn ticket(&self, serials: &SerialPair) -> Option<Ticket> {
        self.state.read().ledger.ticket(serials).cloned()
    }

    pub fn is_spent(&self, outpoint: &OutPoint) -> Option<bool> {
        self.state.read().ledger.is_spent(outpoint)
    }

    pub fn utxos_of(&self, address: &Address) -> Vec<(OutPoint, UtxoEntry)> {
        self.state.read().ledger.utxos_of(address)
    }

    pub fn issued(&self) -> Money {
        self.state.read().ledger.issued()
    }

    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainErr> {
        Ok(self.backend.get_block(hash)?)
    }

    pub fn index_entry(&self, hash: &Hash256) -> Option<IndexEntry> {
        self.state.read().index.get(hash).cloned()
    }

    pub fn is_on_main_chain(&self, hash: &Hash256) -> bool {
        self.state.read().index.is_on_main_chain(hash)
    }

    /// Depth of `hash` below the tip, counting the tip as one. Zero for
    /// blocks off the main chain.
    pub fn confirmations(&self, hash: &Hash256) -> u64 {
        let state = self.state.read();
        match state.index.get(hash) {
            Some(entry) if state.index.is_on_main_chain(hash) => {
                state.index.height().saturating_sub(entry.height) + 1
            }
            _ => 0,
        }
    }

    /// Looks `txid` up on the best chain, then in the mempool
    pub fn transaction_status(&self, txid: &Hash256) -> Result<TxStatus, ChainErr> {
        let (block_hash, height, confirmations) = {
            let state = self.state.read();
            let located = state
                .ledger
                .confirming_block(txid)
                .and_then(|hash| state.index.get(&hash));

            match located {
                Some(entry) => (
                    entry.hash,
                    entry.height,
                    state.index.height().saturating_sub(entry.height) + 1,
                ),
                None => {
                    return Ok(state
                        .mempool
                        .get(txid)
                        .cloned()
                        .map_or(TxStatus::Unknown, TxStatus::Pending))
                }
            }
        };

        // Stored blocks are never deleted, so the body outlives the lock
        let tx = self
            .backend
            .get_block(&block_hash)?
            .and_then(|block| block.txs.into_iter().find(|tx| &tx.hash() == txid))
            .ok_or(ChainErr::Fatal("confirmed transaction missing from store"))?;

        Ok(TxStatus::Confirmed {
            tx,
            block_hash,
            height,
            confirmations,
        })
    }

    /// Hash of the main chain block at `height`
    pub fn main_hash_at(&self, height: u64) -> Option<Hash256> {
        self.state.read().index.main_hash_at(height)
    }

    pub fn ticket_count(&self) -> usize {
        self.state.read().ledger.ticket_count()
    }

    pub fn block_state(&self, hash: &Hash256) -> BlockState {
        if self.validating.lock().contains(hash) {
            return BlockState::Validating;
        }

        let state = self.state.read();
        if let Some(entry) = state.index.get(hash) {
            entry.state
        } else if state.orphans.contains(hash) {
            BlockState::Orphan
        } else {
            BlockState::Unseen
        }
    }

    /// Whether the block is indexed, parked or being validated
    pub fn knows_block(&self, hash: &Hash256) -> bool {
        self.block_state(hash) != BlockState::Unseen
    }

    pub fn locator(&self) -> Vec<Hash256> {
        self.state.read().index.locator()
    }

    pub fn hashes_after_locator(&self, locator: &[Hash256], limit: usize) -> Vec<Hash256> {
        self.state.read().index.hashes_after_locator(locator, limit)
    }

    /// First missing ancestor of a parked orphan
    pub fn orphan_root(&self, hash: &Hash256) -> Option<Hash256> {
        self.state.read().orphans.missing_root(hash)
    }

    pub fn mempool_info(&self) -> MempoolInfo {
        self.state.read().mempool.info()
    }

    pub fn mempool_tx(&self, hash: &Hash256) -> Option<Transaction> {
        self.state.read().mempool.get(hash).cloned()
    }

    pub fn mempool_contains(&self, hash: &Hash256) -> bool {
        self.state.read().mempool.contains(hash)
    }

    pub fn mempool_hashes(&self) -> Vec<Hash256> {
        self.state.read().mempool.hashes()
    }

    /// Validates a transaction against the tip and admits it to the mempool
    pub fn submit_transaction(&self, tx: Transaction, now: i64) -> Result<Hash256, MempoolErr> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let height = state.ledger.next_height();
        state.mempool.insert(tx, &state.ledger, height, now)
    }

    pub fn expire_mempool(&self, now: i64) -> usize {
        let expired = self.state.write().mempool.expire(now);
        if !expired.is_empty() {
            debug!("Expired {} mempool transactions", expired.len());
        }
        expired.len()
    }

    /// Difficulty the child of `parent` must declare
    fn expected_bits(&self, index: &BlockIndex, parent: &IndexEntry) -> u32 {
        let next = parent.height + 1;

        if !self.config.is_retarget_height(next) {
            return parent.bits;
        }

        let first = index
            .ancestor_at(&parent.hash, next - self.config.retarget_interval)
            .map_or(parent.timestamp, |e| e.timestamp);

        calc_next_bits(
            parent.bits,
            parent.timestamp - first,
            self.config.retarget_interval,
            self.config.pow_limit_bits,
        )
    }

    /// Candidate block on top of the current tip paying reward and fees to
    /// `coinbase_address`. The nonce is left at zero.
    pub fn block_template(&self, coinbase_address: Address, now: i64) -> Block {
        let state = self.state.read();
        let tip = state.index.tip();
        let height = tip.height + 1;
        let txs = state
            .mempool
            .select(MAX_BYTES_PER_BLOCK - TEMPLATE_RESERVED_BYTES);
        let fees = txs.iter().fold(0 as Money, |acc, tx| acc.saturating_add(tx.fee));
        let reward = map_height_to_block_reward(height).saturating_add(fees);

        let coinbase_outputs = if reward > 0 {
            vec![TxOutput {
                address: coinbase_address,
                amount: reward,
            }]
        } else {
            vec![]
        };

        let mut all = Vec::with_capacity(txs.len() + 1);
        all.push(Transaction::new_coinbase(height, coinbase_outputs));
        all.extend(txs);

        let header = BlockHeader {
            version: BLOCK_VERSION,
            prev_hash: tip.hash,
            height,
            timestamp: now.max(tip.timestamp),
            bits: self.expected_bits(&state.index, tip),
            tx_root: compute_tx_root(&all),
            nonce: 0,
        };

        Block::new(header, all)
    }

    /// Runs a block through structure, proof of work, linkage and ledger
    /// validation, then adopts it if its branch carries more work than the
    /// tip. Orphans waiting on the block are processed afterwards.
    pub fn process_block(&self, block: Block, now: i64) -> Result<Processed, ChainErr> {
        block.validate_structure()?;
        let hash = block.header.validate_pow()?;

        if block.header.timestamp > now + BLOCK_TIMESTAMP_MAX_FUTURE {
            return Err(BlockVerifyErr::TimestampTooFarInFuture.into());
        }

        let outcome = self.process_known(block, hash, now)?;
        let mut adopted = Vec::new();

        if matches!(outcome, BlockOutcome::Extended | BlockOutcome::Reorganized { .. } | BlockOutcome::SideChain) {
            self.adopt_orphans(hash, now, &mut adopted);
        }

        Ok(Processed {
            hash,
            outcome,
            adopted,
        })
    }

    fn adopt_orphans(&self, parent: Hash256, now: i64, adopted: &mut Vec<(Hash256, BlockOutcome)>) {
        let mut queue = vec![parent];

        while let Some(parent) = queue.pop() {
            let children = self.state.write().orphans.take_children(&parent);

            for (hash, block) in children {
                match self.process_known(block, hash, now) {
                    Ok(outcome) => {
                        debug!("Adopted orphan {} ({:?})", hash, outcome);
                        if !matches!(outcome, BlockOutcome::Orphan { .. } | BlockOutcome::Duplicate) {
                            queue.push(hash);
                        }
                        adopted.push((hash, outcome));
                    }
                    Err(err) => debug!("Orphan {} rejected: {}", hash, err),
                }
            }
        }
    }

    /// Processing after structure and proof of work checks
    fn process_known(&self, block: Block, hash: Hash256, now: i64) -> Result<BlockOutcome, ChainErr> {
        {
            let mut state = self.state.write();

            if let Some(entry) = state.index.get(&hash) {
                return match entry.state {
                    BlockState::Rejected => Err(ChainErr::KnownInvalid),
                    _ => Ok(BlockOutcome::Duplicate),
                };
            }

            if state.orphans.contains(&hash) {
                return Ok(BlockOutcome::Duplicate);
            }

            match state.index.get(&block.header.prev_hash).map(|e| e.state) {
                None => {
                    let parent = block.header.prev_hash;
                    if let Some(evicted) = state.orphans.insert(hash, block) {
                        debug!("Orphan pool full, evicted {}", evicted);
                    }
                    let missing = state.orphans.missing_root(&hash).unwrap_or(parent);
                    debug!("Parked orphan {} waiting on {}", hash, missing);
                    return Ok(BlockOutcome::Orphan { missing });
                }
                Some(BlockState::Rejected) => {
                    drop(state);
                    self.record_rejected(&block, hash)?;
                    return Err(BlockVerifyErr::InvalidParent.into());
                }
                Some(_) => {}
            }
        }

        if !self.validating.lock().insert(hash) {
            return Ok(BlockOutcome::Duplicate);
        }
        let _guard = ValidatingGuard {
            set: &self.validating,
            hash,
        };

        if let Err(err) = block.validate_transactions() {
            self.record_rejected(&block, hash)?;
            return Err(err.into());
        }

        let mut guard = self.state.write();
        let state = &mut *guard;
        let parent = state
            .index
            .get(&block.header.prev_hash)
            .cloned()
            .ok_or(ChainErr::Fatal("parent vanished from index"))?;

        if let Err(err) = self.check_contextual(&state.index, &parent, &block) {
            let mut entry = IndexEntry::child(&parent, &block, hash);
            entry.state = BlockState::Rejected;
            state.index.insert(entry.clone());
            self.backend.commit(WriteSet {
                index_entries: vec![entry],
                ..Default::default()
            })?;
            return Err(err.into());
        }

        let entry = IndexEntry::child(&parent, &block, hash);
        let more_work = entry.work > state.index.tip().work;
        state.index.insert(entry.clone());
        self.backend.commit(WriteSet {
            blocks: vec![(hash, block.clone())],
            index_entries: vec![entry],
            ..Default::default()
        })?;

        if !more_work {
            debug!("Stored side chain block {} at height {}", hash, block.header.height);
            return Ok(BlockOutcome::SideChain);
        }

        let outcome = self.activate(state, &block, hash, now)?;
        let tip = TipInfo::from(state.index.tip());
        drop(guard);

        self.tip_sender.send_replace(tip);
        Ok(outcome)
    }

    fn check_contextual(&self, index: &BlockIndex, parent: &IndexEntry, block: &Block) -> Result<(), BlockVerifyErr> {
        if block.header.height != parent.height + 1 {
            return Err(BlockVerifyErr::InvalidHeight);
        }

        if block.header.timestamp < parent.timestamp {
            return Err(BlockVerifyErr::InvalidTimestamp);
        }

        if block.header.bits != self.expected_bits(index, parent) {
            return Err(BlockVerifyErr::InvalidBits);
        }

        Ok(())
    }

    /// Records a block as rejected without storing its body
    fn record_rejected(&self, block: &Block, hash: Hash256) -> Result<(), ChainErr> {
        let mut state = self.state.write();
        let parent = match state.index.get(&block.header.prev_hash) {
            Some(parent) => parent.clone(),
            None => return Ok(()),
        };

        let mut entry = IndexEntry::child(&parent, block, hash);
        entry.state = BlockState::Rejected;
        state.index.insert(entry.clone());
        drop(state);

        self.backend.commit(WriteSet {
            index_entries: vec![entry],
            ..Default::default()
        })?;
        Ok(())
    }

    fn load_block(&self, hash: &Hash256, in_hand: (&Block, &Hash256)) -> Result<Block, ChainErr> {
        if hash == in_hand.1 {
            return Ok(in_hand.0.clone());
        }

        self.backend
            .get_block(hash)?
            .ok_or(ChainErr::Fatal("indexed block missing from store"))
    }

    /// Makes `hash` the canonical tip, rolling back to the fork point first if
    /// needed. On failure the old branch is restored and the offending block
    /// and its descendants are marked rejected.
    fn activate(
        &self,
        state: &mut ChainState,
        block: &Block,
        hash: Hash256,
        now: i64,
    ) -> Result<BlockOutcome, ChainErr> {
        let old_tip = state.index.tip().hash;
        let in_hand = (block, &hash);

        let fork = state
            .index
            .fork_point(&hash)
            .map(|e| e.hash)
            .ok_or(ChainErr::Fatal("branch not connected to main chain"))?;
        let connect = state
            .index
            .branch_from(&fork, &hash)
            .ok_or(ChainErr::Fatal("branch not connected to main chain"))?;
        let disconnect: Vec<Hash256> = state
            .index
            .branch_from(&fork, &old_tip)
            .ok_or(ChainErr::Fatal("main chain broken"))?
            .into_iter()
            .rev()
            .collect();

        let mut touched: HashSet<SerialPair> = HashSet::new();
        let mut disconnected_blocks = Vec::with_capacity(disconnect.len());

        for h in &disconnect {
            let b = self.load_block(h, in_hand)?;
            if let Some(undo) = state.ledger.undo_for(h) {
                touched.extend(undo.touched_serials());
            }
            state
                .ledger
                .rollback(&b, h)
                .map_err(|_| ChainErr::Fatal("rollback of main chain block failed"))?;
            disconnected_blocks.push(b);
        }

        let mut connected: Vec<(Hash256, Block)> = Vec::with_capacity(connect.len());

        for h in &connect {
            let b = self.load_block(h, in_hand)?;

            if let Err(err) = state.ledger.apply_verified(&b, h) {
                warn!("Block {} failed to connect: {}", h, err);
                let rejected = state.index.mark_rejected(h);
                self.restore(state, connected, &disconnected_blocks, &disconnect)?;

                let entries: Vec<_> = rejected
                    .iter()
                    .filter_map(|r| state.index.get(r).cloned())
                    .collect();
                self.backend.commit(WriteSet {
                    index_entries: entries,
                    ..Default::default()
                })?;

                return Err(err.into());
            }

            if let Some(undo) = state.ledger.undo_for(h) {
                touched.extend(undo.touched_serials());
            }
            connected.push((*h, b));
        }

        if !state.index.set_tip(&hash) {
            return Err(ChainErr::Fatal("could not move tip"));
        }

        let next_height = state.ledger.next_height();
        for (_, b) in &connected {
            state.mempool.remove_for_block(b);
        }

        if !disconnected_blocks.is_empty() {
            let abandoned: Vec<Transaction> = disconnected_blocks
                .iter()
                .rev()
                .flat_map(|b| b.txs.iter().skip(1).cloned())
                .collect();
            let stale = state.mempool.revalidate(&state.ledger, next_height);
            let readded = state.mempool.reinsert(abandoned, &state.ledger, next_height, now);
            debug!("Reorg returned {} transactions to the mempool, dropped {}", readded, stale);
        }

        let (tickets, removed_tickets): (Vec<_>, Vec<_>) = touched
            .into_iter()
            .partition(|s| state.ledger.ticket(s).is_some());

        self.backend.commit(WriteSet {
            tickets: tickets
                .iter()
                .filter_map(|s| state.ledger.ticket(s).cloned())
                .collect(),
            removed_tickets,
            tip: Some(hash),
            ..Default::default()
        })?;

        if disconnect.is_empty() {
            info!("New tip {} at height {}", hash, block.header.height);
            Ok(BlockOutcome::Extended)
        } else {
            info!(
                "Reorganised {} blocks, new tip {} at height {}",
                disconnect.len(),
                hash,
                block.header.height
            );
            Ok(BlockOutcome::Reorganized {
                depth: disconnect.len(),
                disconnected: disconnect,
            })
        }
    }

    /// Undoes a partial reorg and reapplies the previous branch
    fn restore(
        &self,
        state: &mut ChainState,
        connected: Vec<(Hash256, Block)>,
        disconnected_blocks: &[Block],
        disconnect: &[Hash256],
    ) -> Result<(), ChainErr> {
        for (h, b) in connected.iter().rev() {
            state
                .ledger
                .rollback(b, h)
                .map_err(|_| ChainErr::Fatal("could not undo partial reorg"))?;
        }

        for (b, h) in disconnected_blocks.iter().zip(disconnect.iter()).rev() {
            state
                .ledger
                .apply_verified(b, h)
                .map_err(|_| ChainErr::Fatal("could not restore previous branch"))?;
        }

        Ok(())
    }
}
