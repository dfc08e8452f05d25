// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::ChainConfig;
use crate::consensus::MAX_BYTES_PER_BLOCK;
use crate::primitives::{Hash256, LunaHasher, Transaction, TxBody, TxVerifyErr};
use bincode::{Decode, Encode};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fmt;

pub const BLOCK_VERSION: u32 = 1;

#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash256,
    pub height: u64,

    /// Unix timestamp in seconds
    pub timestamp: i64,

    /// Compact encoded target
    pub bits: u32,

    /// Merkle root of the transaction hashes, in block order
    pub tx_root: Hash256,
    pub nonce: u64,
}

impl BlockHeader {
    /// Header bytes fed to LunaHash. The nonce is appended by the hasher.
    pub fn pow_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(&(
            self.version,
            &self.prev_hash,
            self.height,
            self.timestamp,
            self.bits,
            &self.tx_root,
        ))
        .unwrap_or_default()
    }

    /// LunaHash of the header
    pub fn hash(&self) -> Hash256 {
        self.hash_with(&mut LunaHasher::new())
    }

    /// Hash reusing an existing scratchpad
    pub fn hash_with(&self, hasher: &mut LunaHasher) -> Hash256 {
        hasher.hash(&self.pow_bytes(), self.nonce)
    }

    /// Check the proof of work, returning the block hash on success
    pub fn validate_pow(&self) -> Result<Hash256, BlockVerifyErr> {
        if crate::consensus::target_from_bits(self.bits).is_none() {
            return Err(BlockVerifyErr::InvalidBits);
        }

        let hash = self.hash();

        if !hash.meets_difficulty(self.bits) {
            return Err(BlockVerifyErr::InvalidPoW);
        }

        Ok(hash)
    }

    /// Increments the nonce, returning `None` when the nonce space is exhausted.
    pub fn increment_nonce(&mut self) -> Option<()> {
        self.nonce = self.nonce.checked_add(1)?;
        Some(())
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Encode, Decode)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, txs: Vec<Transaction>) -> Self {
        Self { header, txs }
    }

    /// Genesis block for the given network. Its coinbase pays nothing.
    pub fn genesis(config: &ChainConfig) -> Self {
        let txs = vec![Transaction::new_coinbase(0, vec![])];
        let header = BlockHeader {
            version: BLOCK_VERSION,
            prev_hash: Hash256::zero(),
            height: 0,
            timestamp: config.genesis_timestamp,
            bits: config.pow_limit_bits,
            tx_root: compute_tx_root(&txs),
            nonce: 0,
        };

        Self { header, txs }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn size(&self) -> usize {
        crate::codec::encoded_len(self)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap_or_default()
    }

    pub fn tx_hashes(&self) -> Vec<Hash256> {
        self.txs.iter().map(Transaction::hash).collect()
    }

    /// Structural checks. Cheap, and run before any proof of work or
    /// transaction validation.
    pub fn validate_structure(&self) -> Result<(), BlockVerifyErr> {
        if self.header.version != BLOCK_VERSION {
            return Err(BlockVerifyErr::UnsupportedVersion);
        }

        if self.txs.is_empty() {
            return Err(BlockVerifyErr::EmptyBlock);
        }

        if self.size() > MAX_BYTES_PER_BLOCK {
            return Err(BlockVerifyErr::Oversized);
        }

        let hashes = self.tx_hashes();

        if merkle_root(&hashes) != self.header.tx_root {
            return Err(BlockVerifyErr::InvalidTxRoot);
        }

        match self.txs.first().map(|tx| &tx.body) {
            Some(TxBody::Coinbase { height, .. }) if *height == self.header.height => {}
            Some(TxBody::Coinbase { .. }) => return Err(BlockVerifyErr::InvalidCoinbase),
            _ => return Err(BlockVerifyErr::MissingCoinbase),
        }

        if self.txs.iter().skip(1).any(Transaction::is_coinbase) {
            return Err(BlockVerifyErr::InvalidCoinbase);
        }

        let mut seen = HashSet::with_capacity(hashes.len());
        for hash in &hashes {
            if !seen.insert(hash) {
                return Err(BlockVerifyErr::DuplicateTxs);
            }
        }

        Ok(())
    }

    /// Stateless transaction checks, signatures included. Runs on the rayon pool.
    pub fn validate_transactions(&self) -> Result<(), BlockVerifyErr> {
        self.txs
            .par_iter()
            .enumerate()
            .try_for_each(|(i, tx)| tx.validate_stateless().map_err(|err| BlockVerifyErr::Tx(i, err)))
    }
}

/// Merkle root over transaction hashes. Odd levels duplicate the last node.
pub fn merkle_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::zero();
    }

    let mut level: Vec<Hash256> = hashes.to_vec();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                let mut buf = [0; 64];
                buf[..32].copy_from_slice(&left.0);
                buf[32..].copy_from_slice(&right.0);
                Hash256::hash_from_slice(buf, "merkle")
            })
            .collect();
    }

    level[0]
}

pub fn compute_tx_root(txs: &[Transaction]) -> Hash256 {
    let hashes: Vec<_> = txs.iter().map(Transaction::hash).collect();
    merkle_root(&hashes)
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum BlockVerifyErr {
    UnsupportedVersion,
    EmptyBlock,
    Oversized,
    InvalidTxRoot,
    MissingCoinbase,
    InvalidCoinbase,
    DuplicateTxs,
    InvalidBits,
    InvalidPoW,
    InvalidHeight,
    InvalidPrevHash,
    InvalidTimestamp,
    TimestampTooFarInFuture,
    InvalidParent,
    Tx(usize, TxVerifyErr),
}

impl fmt::Display for BlockVerifyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion => f.write_str("unsupported block version"),
            Self::EmptyBlock => f.write_str("block has no transactions"),
            Self::Oversized => f.write_str("block too large"),
            Self::InvalidTxRoot => f.write_str("transaction root mismatch"),
            Self::MissingCoinbase => f.write_str("first transaction is not a coinbase"),
            Self::InvalidCoinbase => f.write_str("invalid coinbase"),
            Self::DuplicateTxs => f.write_str("duplicate transactions"),
            Self::InvalidBits => f.write_str("unexpected difficulty bits"),
            Self::InvalidPoW => f.write_str("proof of work above target"),
            Self::InvalidHeight => f.write_str("invalid height"),
            Self::InvalidPrevHash => f.write_str("invalid previous hash"),
            Self::InvalidTimestamp => f.write_str("timestamp earlier than parent"),
            Self::TimestampTooFarInFuture => f.write_str("timestamp too far in the future"),
            Self::InvalidParent => f.write_str("parent block was rejected"),
            Self::Tx(i, err) => write!(f, "transaction {i}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{OutPoint, TxOutput};
    use crate::test_util::*;
    use quickcheck::*;

    fn block_with(txs: Vec<Transaction>) -> Block {
        let config = ChainConfig::regtest();
        let header = BlockHeader {
            version: BLOCK_VERSION,
            prev_hash: Hash256::zero(),
            height: 1,
            timestamp: config.genesis_timestamp + 60,
            bits: config.pow_limit_bits,
            tx_root: compute_tx_root(&txs),
            nonce: 0,
        };
        Block::new(header, txs)
    }

    quickcheck! {
        fn merkle_root_commits_to_order(a: Vec<u8>, b: Vec<u8>) -> bool {
            let ha = Hash256::hash_from_slice(&a, "leaf");
            let hb = Hash256::hash_from_slice(&b, "leaf.other");
            merkle_root(&[ha, hb]) != merkle_root(&[hb, ha])
        }
    }

    #[test]
    fn block_encode_decode() {
        let genesis = Block::genesis(&ChainConfig::regtest());
        let encoded = crate::codec::encode_to_vec(&genesis).unwrap();
        let decoded: Block = crate::codec::decode(&encoded).unwrap();
        assert_eq!(decoded, genesis);
        assert_eq!(decoded.hash(), genesis.hash());
    }

    #[test]
    fn genesis_differs_per_network() {
        assert_ne!(
            Block::genesis(&ChainConfig::regtest()).hash(),
            Block::genesis(&ChainConfig::mainnet()).hash()
        );
    }

    #[test]
    fn it_rejects_mismatched_tx_root() {
        let key = test_key(1);
        let mut block = block_with(vec![coinbase_to(1, &key, 10)]);
        assert!(block.validate_structure().is_ok());

        // Appending a transaction with an invalid signature must fail on the root
        // first, before any per transaction validation can run.
        let mut bogus = transfer(&key, vec![OutPoint::new(Hash256::zero(), 0)], vec![], 1);
        bogus.fee = 99;
        block.txs.push(bogus);
        assert_eq!(block.validate_structure(), Err(BlockVerifyErr::InvalidTxRoot));
    }

    #[test]
    fn it_requires_leading_coinbase() {
        let key = test_key(1);
        let tx = transfer(&key, vec![OutPoint::new(Hash256::zero(), 0)], vec![], 1);
        let block = block_with(vec![tx.clone()]);
        assert_eq!(block.validate_structure(), Err(BlockVerifyErr::MissingCoinbase));

        let block = block_with(vec![coinbase_to(1, &key, 10), coinbase_to(1, &key, 11)]);
        assert_eq!(block.validate_structure(), Err(BlockVerifyErr::InvalidCoinbase));

        let block = block_with(vec![coinbase_to(2, &key, 10)]);
        assert_eq!(block.validate_structure(), Err(BlockVerifyErr::InvalidCoinbase));

        let block = block_with(vec![coinbase_to(1, &key, 10), tx.clone(), tx]);
        assert_eq!(block.validate_structure(), Err(BlockVerifyErr::DuplicateTxs));
    }

    #[test]
    fn it_checks_pow() {
        let mut block = block_with(vec![coinbase_to(1, &test_key(1), 10)]);
        // Regtest needs ~2 attempts per block
        while block.header.validate_pow().is_err() {
            block.header.increment_nonce().unwrap();
        }
        assert_eq!(block.header.validate_pow().unwrap(), block.hash());

        block.header.bits = 0x0400_0000;
        assert_eq!(block.header.validate_pow(), Err(BlockVerifyErr::InvalidBits));
    }

    #[test]
    fn transaction_errors_carry_index() {
        let key = test_key(1);
        let mut bad = transfer(&key, vec![OutPoint::new(Hash256::zero(), 0)], vec![TxOutput { address: address_of(&key), amount: 5 }], 1);
        bad.fee = 2;
        let block = block_with(vec![coinbase_to(1, &key, 10), bad]);
        assert!(block.validate_structure().is_ok());
        assert_eq!(
            block.validate_transactions(),
            Err(BlockVerifyErr::Tx(1, TxVerifyErr::InvalidSignature))
        );
    }
}
