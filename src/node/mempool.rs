// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::Ledger;
use crate::primitives::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Default max number of transactions
pub const DEFAULT_MEMPOOL_CAPACITY: usize = 50_000;

/// Default age after which entries are dropped, in seconds
pub const DEFAULT_MEMPOOL_EXPIRY: i64 = 14 * 24 * 60 * 60;

/// Ascending priority. The first key is the next eviction candidate: lowest
/// fee rate, and among equal rates the most recently inserted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    fee_rate: FeeRate,
    seq: Reverse<u64>,
    hash: Hash256,
}

#[derive(Debug)]
struct MempoolEntry {
    tx: TransactionWithFee,
    key: PriorityKey,
    inserted_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MempoolErr {
    AlreadyKnown,

    /// Spends an output or claims a ticket already claimed by a pooled transaction
    Conflict(Hash256),

    /// At capacity and the transaction does not outbid the lowest entry
    Full,
    Invalid(TxVerifyErr),
}

impl fmt::Display for MempoolErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyKnown => f.write_str("transaction already in mempool"),
            Self::Conflict(other) => write!(f, "conflicts with pending transaction {other}"),
            Self::Full => f.write_str("mempool full"),
            Self::Invalid(err) => write!(f, "{err}"),
        }
    }
}

impl From<TxVerifyErr> for MempoolErr {
    fn from(other: TxVerifyErr) -> Self {
        Self::Invalid(other)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolInfo {
    pub size: usize,
    pub bytes: u64,
    pub capacity: usize,

    /// Fee per byte of the lowest priority entry
    pub min_fee_rate: f64,
}

#[derive(Debug)]
pub struct Mempool {
    tx_list: BTreeSet<PriorityKey>,
    tx_map: HashMap<Hash256, MempoolEntry>,
    spends: HashMap<OutPoint, Hash256>,
    serials: HashMap<SerialPair, Hash256>,
    current_size_bytes: u64,
    capacity: usize,
    expiry: i64,
    next_seq: u64,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(DEFAULT_MEMPOOL_CAPACITY, DEFAULT_MEMPOOL_EXPIRY)
    }
}

impl Mempool {
    pub fn new(capacity: usize, expiry: i64) -> Self {
        Self {
            tx_list: BTreeSet::new(),
            tx_map: HashMap::new(),
            spends: HashMap::new(),
            serials: HashMap::new(),
            current_size_bytes: 0,
            capacity: capacity.max(1),
            expiry,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tx_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx_map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.tx_map.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<&Transaction> {
        self.tx_map.get(hash).map(|e| e.tx.tx())
    }

    pub fn info(&self) -> MempoolInfo {
        MempoolInfo {
            size: self.len(),
            bytes: self.current_size_bytes,
            capacity: self.capacity,
            min_fee_rate: self
                .tx_list
                .iter()
                .next()
                .map_or(0.0, |k| k.fee_rate.per_byte()),
        }
    }

    /// Validates `tx` against `ledger` as if it were included at `height`
    /// and admits it. The first seen of two conflicting transactions wins.
    pub fn insert(
        &mut self,
        tx: Transaction,
        ledger: &Ledger,
        height: u64,
        now: i64,
    ) -> Result<Hash256, MempoolErr> {
        let tx = TransactionWithFee::from_transaction(tx);
        let hash = *tx.hash();

        if self.contains(&hash) {
            return Err(MempoolErr::AlreadyKnown);
        }

        tx.tx().validate_stateless()?;
        ledger.check_transaction(tx.tx(), height)?;

        if let Some(other) = self.find_conflict(tx.tx()) {
            return Err(MempoolErr::Conflict(other));
        }

        if self.len() >= self.capacity {
            match self.tx_list.iter().next().copied() {
                Some(lowest) if tx.fee_rate > lowest.fee_rate => {
                    debug!("Mempool full, evicting {}", lowest.hash);
                    self.remove(&lowest.hash);
                }
                _ => return Err(MempoolErr::Full),
            }
        }

        self.admit(tx, now);
        Ok(hash)
    }

    fn admit(&mut self, tx: TransactionWithFee, now: i64) {
        let hash = *tx.hash();
        let key = PriorityKey {
            fee_rate: tx.fee_rate,
            seq: Reverse(self.next_seq),
            hash,
        };
        self.next_seq += 1;

        for input in tx.tx().inputs() {
            self.spends.insert(*input, hash);
        }

        if let Some(serials) = tx.tx().serials() {
            self.serials.insert(serials.clone(), hash);
        }

        self.current_size_bytes += tx.tx_size as u64;
        self.tx_list.insert(key);
        self.tx_map.insert(
            hash,
            MempoolEntry {
                tx,
                key,
                inserted_at: now,
            },
        );
    }

    fn find_conflict(&self, tx: &Transaction) -> Option<Hash256> {
        tx.inputs()
            .iter()
            .find_map(|i| self.spends.get(i).copied())
            .or_else(|| tx.serials().and_then(|s| self.serials.get(s).copied()))
    }

    pub fn remove(&mut self, hash: &Hash256) -> Option<Transaction> {
        let entry = self.tx_map.remove(hash)?;
        self.tx_list.remove(&entry.key);
        self.current_size_bytes -= entry.tx.tx_size as u64;

        for input in entry.tx.tx().inputs() {
            self.spends.remove(input);
        }

        if let Some(serials) = entry.tx.tx().serials() {
            self.serials.remove(serials);
        }

        Some(entry.tx.into())
    }

    /// Drops the block's transactions and anything they invalidated by
    /// spending the same outputs or claiming the same tickets.
    pub fn remove_for_block(&mut self, block: &Block) -> usize {
        let mut removed = 0;

        for tx in block.txs.iter().skip(1) {
            if self.remove(&tx.hash()).is_some() {
                removed += 1;
            }

            while let Some(other) = self.find_conflict(tx) {
                self.remove(&other);
                removed += 1;
            }
        }

        removed
    }

    /// Offers transactions from an abandoned branch back to the pool.
    /// Returns how many were admitted.
    pub fn reinsert(&mut self, txs: Vec<Transaction>, ledger: &Ledger, height: u64, now: i64) -> usize {
        txs.into_iter()
            .filter(|tx| !tx.is_coinbase())
            .filter(|tx| self.insert(tx.clone(), ledger, height, now).is_ok())
            .count()
    }

    /// Drops entries that are no longer valid against `ledger`
    pub fn revalidate(&mut self, ledger: &Ledger, height: u64) -> usize {
        let stale: Vec<_> = self
            .tx_map
            .iter()
            .filter(|(_, e)| ledger.check_transaction(e.tx.tx(), height).is_err())
            .map(|(h, _)| *h)
            .collect();

        for hash in &stale {
            self.remove(hash);
        }

        stale.len()
    }

    /// Drops entries inserted `expiry` or more seconds before `now`
    pub fn expire(&mut self, now: i64) -> Vec<Hash256> {
        let expired: Vec<_> = self
            .tx_map
            .iter()
            .filter(|(_, e)| now - e.inserted_at >= self.expiry)
            .map(|(h, _)| *h)
            .collect();

        for hash in &expired {
            self.remove(hash);
        }

        expired
    }

    /// Highest priority transactions whose total encoded size stays within `max_bytes`
    pub fn select(&self, max_bytes: usize) -> Vec<Transaction> {
        let mut out = Vec::new();
        let mut total = 0;

        for key in self.tx_list.iter().rev() {
            let entry = &self.tx_map[&key.hash];
            let size = entry.tx.tx_size as usize;

            if total + size > max_bytes {
                continue;
            }

            total += size;
            out.push(entry.tx.tx().clone());
        }

        out
    }

    /// Pooled transaction hashes, highest priority first
    pub fn hashes(&self) -> Vec<Hash256> {
        self.tx_list.iter().rev().map(|key| key.hash).collect()
    }
}
