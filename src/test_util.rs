// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Shared helpers for unit tests

use crate::consensus::Money;
use crate::primitives::*;
use ed25519_dalek::SigningKey;

/// Deterministic signing key
pub fn test_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn address_of(key: &SigningKey) -> Address {
    PublicKey(key.verifying_key()).to_address()
}

pub fn transfer(
    key: &SigningKey,
    inputs: Vec<OutPoint>,
    outputs: Vec<TxOutput>,
    fee: Money,
) -> Transaction {
    Transaction::new_signed(TxBody::ValueTransfer { inputs, outputs }, fee, key)
}

pub fn pay(key: &SigningKey, amount: Money) -> TxOutput {
    TxOutput {
        address: address_of(key),
        amount,
    }
}

pub fn coinbase_to(height: u64, key: &SigningKey, amount: Money) -> Transaction {
    Transaction::new_coinbase(height, vec![pay(key, amount)])
}

pub fn commit_ticket(
    key: &SigningKey,
    serials: SerialPair,
    locked_value: Money,
    inputs: Vec<OutPoint>,
    change: Vec<TxOutput>,
    fee: Money,
) -> Transaction {
    let body = TxBody::TicketCommit {
        artifact_hash: Hash256::hash_from_slice(serials.to_key(), "artifact"),
        serials,
        locked_value,
        inputs,
        change,
    };
    Transaction::new_signed(body, fee, key)
}

pub fn redeem_value(key: &SigningKey, serials: SerialPair, fee: Money) -> Transaction {
    Transaction::new_signed(TxBody::TicketRedeemValue { serials }, fee, key)
}

pub fn redeem_identity(key: &SigningKey, serials: SerialPair, profile: &[u8]) -> Transaction {
    let body = TxBody::TicketRedeemIdentity {
        serials,
        profile: profile.to_vec(),
    };
    Transaction::new_signed(body, 0, key)
}

/// Child block of `parent` with the given transactions. The nonce is searched
/// until the header satisfies `bits`.
pub fn mine_child(parent: &Block, parent_hash: &Hash256, txs: Vec<Transaction>, bits: u32) -> Block {
    let header = BlockHeader {
        version: BLOCK_VERSION,
        prev_hash: *parent_hash,
        height: parent.header.height + 1,
        timestamp: parent.header.timestamp + 60,
        bits,
        tx_root: compute_tx_root(&txs),
        nonce: 0,
    };
    let mut block = Block::new(header, txs);
    let mut hasher = LunaHasher::new();

    while !block.header.hash_with(&mut hasher).meets_difficulty(bits) {
        block.header.increment_nonce().unwrap();
    }

    block
}

/// Empty child paying the block reward to `key`. `tag` varies the coinbase so
/// sibling blocks differ.
pub fn mine_empty_child(parent: &Block, key: &SigningKey, tag: Money) -> Block {
    let height = parent.header.height + 1;
    let reward = crate::consensus::map_height_to_block_reward(height);
    let coinbase = coinbase_to(height, key, reward - tag);
    mine_child(parent, &parent.hash(), vec![coinbase], parent.header.bits)
}
