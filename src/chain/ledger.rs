// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Balances and the ticket registry at the current tip.
//!
//! Every applied block leaves an undo record behind, so the ledger can be
//! walked back to any ancestor during a reorganisation. Both `apply` and
//! `rollback` are all-or-nothing: a failure half way through a block reverts
//! the effects already written before the error is returned.

use crate::chain::redemption;
use crate::consensus::{map_height_to_block_reward, Money};
use crate::primitives::*;
use bincode::{Decode, Encode};
use log::*;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// An unspent output together with the data needed to check spends against it
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct UtxoEntry {
    pub output: TxOutput,

    /// Height of the block that created the output
    pub height: u64,
    pub coinbase: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LedgerOp {
    Spend { outpoint: OutPoint, entry: UtxoEntry },
    Create { outpoint: OutPoint },
    RegisterTicket { serials: SerialPair },
    UpdateTicket { previous: Ticket },
}

/// Effects of one block, in application order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockUndo {
    ops: Vec<LedgerOp>,
    issued: Money,
}

impl BlockUndo {
    /// Serial pairs whose registry entry this block created or changed
    pub fn touched_serials(&self) -> Vec<SerialPair> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                LedgerOp::RegisterTicket { serials } => Some(serials.clone()),
                LedgerOp::UpdateTicket { previous } => Some(previous.serials.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerErr {
    /// Block does not build on the ledger tip
    NotTip,

    /// No undo record for the block being rolled back
    MissingUndo(Hash256),
    Block(BlockVerifyErr),
    Tx {
        index: usize,
        txid: Hash256,
        err: TxVerifyErr,
    },
}

impl LedgerErr {
    /// The transaction level cause, if any
    pub fn tx_err(&self) -> Option<&TxVerifyErr> {
        match self {
            Self::Tx { err, .. } => Some(err),
            Self::Block(BlockVerifyErr::Tx(_, err)) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotTip => f.write_str("block does not extend the ledger tip"),
            Self::MissingUndo(hash) => write!(f, "no undo record for block {hash}"),
            Self::Block(err) => write!(f, "{err}"),
            Self::Tx { index, txid, err } => write!(f, "transaction {index} ({txid}): {err}"),
        }
    }
}

impl From<BlockVerifyErr> for LedgerErr {
    fn from(other: BlockVerifyErr) -> Self {
        Self::Block(other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    utxos: HashMap<OutPoint, UtxoEntry>,
    spent: HashSet<OutPoint>,
    balances: HashMap<Address, Money>,
    tickets: HashMap<SerialPair, Ticket>,
    undo: HashMap<Hash256, BlockUndo>,

    /// Confirming block of every transaction on the current chain
    confirmed: HashMap<Hash256, Hash256>,
    tip: Option<(Hash256, u64)>,

    /// Sum of all coinbase outputs on the current chain
    issued: Money,
    coinbase_maturity: u64,
}

impl Ledger {
    pub fn new(coinbase_maturity: u64) -> Self {
        Self {
            utxos: HashMap::new(),
            spent: HashSet::new(),
            balances: HashMap::new(),
            tickets: HashMap::new(),
            undo: HashMap::new(),
            confirmed: HashMap::new(),
            tip: None,
            issued: 0,
            coinbase_maturity,
        }
    }

    /// Hash and height of the last applied block
    pub fn tip(&self) -> Option<(Hash256, u64)> {
        self.tip
    }

    /// Height the next block will have
    pub fn next_height(&self) -> u64 {
        self.tip.map_or(0, |(_, h)| h + 1)
    }

    pub fn issued(&self) -> Money {
        self.issued
    }

    pub fn balance_of(&self, address: &Address) -> Money {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn ticket(&self, serials: &SerialPair) -> Option<&Ticket> {
        self.tickets.get(serials)
    }

    pub fn tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.tickets.values()
    }

    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }

    /// `Some(true)` if spent on this chain, `Some(false)` if unspent and
    /// `None` if the output was never created.
    pub fn is_spent(&self, outpoint: &OutPoint) -> Option<bool> {
        if self.utxos.contains_key(outpoint) {
            Some(false)
        } else if self.spent.contains(outpoint) {
            Some(true)
        } else {
            None
        }
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.utxos.get(outpoint)
    }

    /// Unspent outputs paying to `address`, sorted by outpoint
    pub fn utxos_of(&self, address: &Address) -> Vec<(OutPoint, UtxoEntry)> {
        let mut out: Vec<_> = self
            .utxos
            .iter()
            .filter(|(_, e)| &e.output.address == address)
            .map(|(o, e)| (*o, e.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Hash of the block on the current chain that includes `txid`
    pub fn confirming_block(&self, txid: &Hash256) -> Option<Hash256> {
        self.confirmed.get(txid).copied()
    }

    pub fn undo_for(&self, block_hash: &Hash256) -> Option<&BlockUndo> {
        self.undo.get(block_hash)
    }

    /// Read only validation of a non coinbase transaction as if it were
    /// included at `height`. Stateless checks are assumed to have passed.
    pub fn check_transaction(&self, tx: &Transaction, height: u64) -> Result<(), TxVerifyErr> {
        self.evaluate(tx, height).map(|_| ())
    }

    /// Apply `block`, whose hash is `block_hash`, on top of the current tip.
    pub fn apply(&mut self, block: &Block, block_hash: &Hash256) -> Result<(), LedgerErr> {
        let expected_prev = self.tip.map_or(Hash256::zero(), |(h, _)| h);
        if block.header.prev_hash != expected_prev || block.header.height != self.next_height() {
            return Err(LedgerErr::NotTip);
        }

        block.validate_structure()?;
        block.validate_transactions()?;
        self.apply_verified(block, block_hash)
    }

    /// Like [`Ledger::apply`] for blocks whose structure and signatures were
    /// already checked.
    pub fn apply_verified(&mut self, block: &Block, block_hash: &Hash256) -> Result<(), LedgerErr> {
        let expected_prev = self.tip.map_or(Hash256::zero(), |(h, _)| h);
        if block.header.prev_hash != expected_prev || block.header.height != self.next_height() {
            return Err(LedgerErr::NotTip);
        }

        let height = block.header.height;
        let mut undo = BlockUndo::default();

        if let Err(err) = self.connect(block, height, &mut undo) {
            self.revert(undo);
            return Err(err);
        }

        trace!(
            "Applied block {} at height {} ({} ops)",
            block_hash,
            height,
            undo.ops.len()
        );

        self.issued += undo.issued;
        self.undo.insert(*block_hash, undo);
        self.confirmed
            .extend(block.txs.iter().map(|tx| (tx.hash(), *block_hash)));
        self.tip = Some((*block_hash, height));
        Ok(())
    }

    /// Undo the tip block. `block` must be the block last applied.
    pub fn rollback(&mut self, block: &Block, block_hash: &Hash256) -> Result<(), LedgerErr> {
        match self.tip {
            Some((tip, _)) if &tip == block_hash => {}
            _ => return Err(LedgerErr::NotTip),
        }

        let undo = self
            .undo
            .remove(block_hash)
            .ok_or(LedgerErr::MissingUndo(*block_hash))?;

        self.issued -= undo.issued;
        self.revert(undo);
        for tx in &block.txs {
            self.confirmed.remove(&tx.hash());
        }
        self.tip = if block.header.height == 0 {
            None
        } else {
            Some((block.header.prev_hash, block.header.height - 1))
        };

        trace!("Rolled back block {}", block_hash);
        Ok(())
    }

    fn connect(&mut self, block: &Block, height: u64, undo: &mut BlockUndo) -> Result<(), LedgerErr> {
        let fees = block
            .txs
            .iter()
            .skip(1)
            .try_fold(0 as Money, |acc, tx| acc.checked_add(tx.fee));

        for (index, tx) in block.txs.iter().enumerate() {
            let txid = tx.hash();
            let to_err = |err| LedgerErr::Tx { index, txid, err };

            if index == 0 {
                let outputs = tx.outputs();
                let minted = sum_outputs(outputs).map_err(to_err)?;
                let fees = fees.ok_or(to_err(TxVerifyErr::AmountOverflow))?;
                let allowed = fees
                    .checked_add(map_height_to_block_reward(height))
                    .ok_or(to_err(TxVerifyErr::AmountOverflow))?;

                if minted > allowed {
                    return Err(to_err(TxVerifyErr::InvalidCoinbase));
                }

                self.create_outputs(&txid, outputs, height, true, undo);

                // Fees move existing coins, only the remainder is new supply
                undo.issued = minted.saturating_sub(fees);
                continue;
            }

            let effects = self.evaluate(tx, height).map_err(to_err)?;
            self.commit_effects(tx, &txid, height, effects, undo);
        }

        Ok(())
    }

    /// Validates `tx` against the current state, returning what applying it would change.
    fn evaluate(&self, tx: &Transaction, height: u64) -> Result<Effects, TxVerifyErr> {
        if tx.is_coinbase() {
            return Err(TxVerifyErr::UnexpectedCoinbase);
        }

        let signer = tx.signer_address().ok_or(TxVerifyErr::MissingWitness)?;

        match &tx.body {
            TxBody::ValueTransfer { inputs, outputs } => {
                let input_sum = self.sum_inputs(inputs, &signer, height)?;
                let needed = sum_outputs(outputs)?
                    .checked_add(tx.fee)
                    .ok_or(TxVerifyErr::AmountOverflow)?;

                if input_sum < needed {
                    return Err(TxVerifyErr::InsufficientFunds);
                }

                Ok(Effects::Transfer)
            }

            TxBody::TicketCommit {
                serials,
                artifact_hash,
                locked_value,
                inputs,
                change,
            } => {
                if self.tickets.contains_key(serials) {
                    return Err(TxVerifyErr::TicketExists);
                }

                let input_sum = self.sum_inputs(inputs, &signer, height)?;
                let needed = sum_outputs(change)?
                    .checked_add(*locked_value)
                    .and_then(|v| v.checked_add(tx.fee))
                    .ok_or(TxVerifyErr::AmountOverflow)?;

                if input_sum < needed {
                    return Err(TxVerifyErr::InsufficientFunds);
                }

                Ok(Effects::Register(Ticket {
                    serials: serials.clone(),
                    artifact_hash: *artifact_hash,
                    owner: signer,
                    locked_value: *locked_value,
                    status: TicketStatus::Committed,
                    profile: None,
                    commit_tx: tx.hash(),
                    commit_height: height,
                }))
            }

            TxBody::TicketRedeemIdentity { serials, .. } | TxBody::TicketRedeemValue { serials } => {
                let outcome = redemption::redeem(self.tickets.get(serials), &signer, &tx.body, tx.fee)?;
                Ok(Effects::Redeem {
                    updated: outcome.updated,
                    payout: outcome.payout,
                    claimant: signer,
                })
            }

            TxBody::Coinbase { .. } => Err(TxVerifyErr::UnexpectedCoinbase),
        }
    }

    fn sum_inputs(&self, inputs: &[OutPoint], signer: &Address, height: u64) -> Result<Money, TxVerifyErr> {
        let mut total: Money = 0;

        for outpoint in inputs {
            let entry = match self.utxos.get(outpoint) {
                Some(entry) => entry,
                None if self.spent.contains(outpoint) => return Err(TxVerifyErr::InputSpent(*outpoint)),
                None => return Err(TxVerifyErr::UnknownInput(*outpoint)),
            };

            if &entry.output.address != signer {
                return Err(TxVerifyErr::InputNotOwned(*outpoint));
            }

            if entry.coinbase && height < entry.height + self.coinbase_maturity {
                return Err(TxVerifyErr::CoinbaseOutSpentBeforeMaturation(*outpoint));
            }

            total = total
                .checked_add(entry.output.amount)
                .ok_or(TxVerifyErr::AmountOverflow)?;
        }

        Ok(total)
    }

    fn commit_effects(
        &mut self,
        tx: &Transaction,
        txid: &Hash256,
        height: u64,
        effects: Effects,
        undo: &mut BlockUndo,
    ) {
        for outpoint in tx.inputs() {
            if let Some(entry) = self.utxos.remove(outpoint) {
                self.debit(&entry.output.address, entry.output.amount);
                self.spent.insert(*outpoint);
                undo.ops.push(LedgerOp::Spend {
                    outpoint: *outpoint,
                    entry,
                });
            }
        }

        self.create_outputs(txid, tx.outputs(), height, false, undo);

        match effects {
            Effects::Transfer => {}

            Effects::Register(ticket) => {
                let serials = ticket.serials.clone();
                self.tickets.insert(serials.clone(), ticket);
                undo.ops.push(LedgerOp::RegisterTicket { serials });
            }

            Effects::Redeem {
                updated,
                payout,
                claimant,
            } => {
                if let Some(previous) = self.tickets.insert(updated.serials.clone(), updated) {
                    undo.ops.push(LedgerOp::UpdateTicket { previous });
                }

                if payout > 0 {
                    let output = TxOutput {
                        address: claimant,
                        amount: payout,
                    };
                    self.create_outputs(txid, std::slice::from_ref(&output), height, false, undo);
                }
            }
        }
    }

    fn create_outputs(
        &mut self,
        txid: &Hash256,
        outputs: &[TxOutput],
        height: u64,
        coinbase: bool,
        undo: &mut BlockUndo,
    ) {
        for (i, output) in outputs.iter().enumerate() {
            let outpoint = OutPoint::new(*txid, i as u32);
            self.credit(&output.address, output.amount);
            self.utxos.insert(
                outpoint,
                UtxoEntry {
                    output: output.clone(),
                    height,
                    coinbase,
                },
            );
            undo.ops.push(LedgerOp::Create { outpoint });
        }
    }

    fn revert(&mut self, undo: BlockUndo) {
        for op in undo.ops.into_iter().rev() {
            match op {
                LedgerOp::Spend { outpoint, entry } => {
                    self.credit(&entry.output.address, entry.output.amount);
                    self.spent.remove(&outpoint);
                    self.utxos.insert(outpoint, entry);
                }

                LedgerOp::Create { outpoint } => {
                    if let Some(entry) = self.utxos.remove(&outpoint) {
                        self.debit(&entry.output.address, entry.output.amount);
                    }
                }

                LedgerOp::RegisterTicket { serials } => {
                    self.tickets.remove(&serials);
                }

                LedgerOp::UpdateTicket { previous } => {
                    self.tickets.insert(previous.serials.clone(), previous);
                }
            }
        }
    }

    fn credit(&mut self, address: &Address, amount: Money) {
        *self.balances.entry(*address).or_insert(0) += amount;
    }

    fn debit(&mut self, address: &Address, amount: Money) {
        if let Some(balance) = self.balances.get_mut(address) {
            *balance -= amount;

            if *balance == 0 {
                self.balances.remove(address);
            }
        }
    }
}

enum Effects {
    Transfer,
    Register(Ticket),
    Redeem {
        updated: Ticket,
        payout: Money,
        claimant: Address,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainConfig;
    use crate::consensus::{issued_at_height, map_height_to_block_reward};
    use crate::test_util::*;

    struct Fixture {
        ledger: Ledger,
        blocks: Vec<Block>,
    }

    impl Fixture {
        fn new() -> Self {
            let genesis = Block::genesis(&ChainConfig::regtest());
            let mut ledger = Ledger::new(0);
            ledger.apply(&genesis, &genesis.hash()).unwrap();
            Self {
                ledger,
                blocks: vec![genesis],
            }
        }

        fn tip(&self) -> &Block {
            self.blocks.last().unwrap()
        }

        /// Mines a block paying reward plus fees to `miner`
        fn child(&self, miner: u8, txs: Vec<Transaction>) -> Block {
            let height = self.tip().height() + 1;
            let fees: Money = txs.iter().map(|tx| tx.fee).sum();
            let mut all = vec![coinbase_to(height, &test_key(miner), map_height_to_block_reward(height) + fees)];
            all.extend(txs);
            mine_child(self.tip(), &self.tip().hash(), all, self.tip().header.bits)
        }

        fn push(&mut self, miner: u8, txs: Vec<Transaction>) -> Result<Block, LedgerErr> {
            let block = self.child(miner, txs);
            self.ledger.apply(&block, &block.hash())?;
            self.blocks.push(block.clone());
            Ok(block)
        }
    }

    fn reward_outpoint(block: &Block) -> OutPoint {
        OutPoint::new(block.txs[0].hash(), 0)
    }

    #[test]
    fn coinbase_credits_miner() {
        let mut f = Fixture::new();
        f.push(1, vec![]).unwrap();
        assert_eq!(f.ledger.balance_of(&address_of(&test_key(1))), map_height_to_block_reward(1));
        assert_eq!(f.ledger.issued(), issued_at_height(1) - map_height_to_block_reward(0));
    }

    #[test]
    fn rollback_restores_exact_state() {
        let mut f = Fixture::new();
        let b1 = f.push(1, vec![]).unwrap();
        let alice = test_key(1);
        let bob = test_key(2);

        let before = f.ledger.clone();
        let reward = map_height_to_block_reward(1);
        let tx = transfer(&alice, vec![reward_outpoint(&b1)], vec![pay(&bob, reward / 2)], 1_000);
        let commit = commit_ticket(
            &bob,
            SerialPair::new("LKC-1", "F-1"),
            1,
            vec![reward_outpoint(&f.child(2, vec![]))],
            vec![],
            0,
        );
        // The commit above spends an output that doesn't exist yet, so only the
        // transfer goes in.
        let txid = tx.hash();
        let b2 = f.child(3, vec![tx]);
        f.ledger.apply(&b2, &b2.hash()).unwrap();
        assert_ne!(f.ledger, before);
        assert_eq!(f.ledger.confirming_block(&txid), Some(b2.hash()));
        assert_eq!(f.ledger.is_spent(&reward_outpoint(&b1)), Some(true));

        f.ledger.rollback(&b2, &b2.hash()).unwrap();
        assert_eq!(f.ledger, before);
        assert_eq!(f.ledger.confirming_block(&txid), None);
        assert_eq!(f.ledger.is_spent(&reward_outpoint(&b1)), Some(false));
        assert_eq!(
            f.ledger.check_transaction(&commit, 2),
            Err(TxVerifyErr::UnknownInput(commit.inputs()[0]))
        );
    }

    #[test]
    fn failed_apply_leaves_no_trace() {
        let mut f = Fixture::new();
        let b1 = f.push(1, vec![]).unwrap();
        let alice = test_key(1);
        let reward = map_height_to_block_reward(1);
        let before = f.ledger.clone();

        let good = transfer(&alice, vec![reward_outpoint(&b1)], vec![pay(&test_key(2), reward - 10)], 10);
        let unknown = transfer(&alice, vec![OutPoint::new(Hash256::zero(), 7)], vec![pay(&alice, 1)], 0);
        let block = f.child(3, vec![good, unknown]);

        let err = f.ledger.apply(&block, &block.hash()).unwrap_err();
        assert!(matches!(err, LedgerErr::Tx { index: 2, .. }));
        assert_eq!(f.ledger, before);
    }

    #[test]
    fn double_spend_is_rejected() {
        let mut f = Fixture::new();
        let b1 = f.push(1, vec![]).unwrap();
        let alice = test_key(1);
        let reward = map_height_to_block_reward(1);
        let spend = |to: u8| transfer(&alice, vec![reward_outpoint(&b1)], vec![pay(&test_key(to), reward)], 0);

        f.push(4, vec![spend(2)]).unwrap();
        let err = f.push(4, vec![spend(3)]).unwrap_err();
        assert_eq!(err.tx_err(), Some(&TxVerifyErr::InputSpent(reward_outpoint(&b1))));

        // Within a single block too
        let mut f = Fixture::new();
        let b1 = f.push(1, vec![]).unwrap();
        let a = transfer(&alice, vec![reward_outpoint(&b1)], vec![pay(&test_key(2), reward)], 0);
        let b = transfer(&alice, vec![reward_outpoint(&b1)], vec![pay(&test_key(3), reward)], 0);
        let err = f.push(4, vec![a, b]).unwrap_err();
        assert_eq!(err.tx_err(), Some(&TxVerifyErr::InputSpent(reward_outpoint(&b1))));
    }

    #[test]
    fn spending_requires_ownership_and_funds() {
        let mut f = Fixture::new();
        let b1 = f.push(1, vec![]).unwrap();
        let reward = map_height_to_block_reward(1);

        let thief = transfer(&test_key(9), vec![reward_outpoint(&b1)], vec![pay(&test_key(9), 1)], 0);
        assert_eq!(
            f.ledger.check_transaction(&thief, 2),
            Err(TxVerifyErr::InputNotOwned(reward_outpoint(&b1)))
        );

        let greedy = transfer(&test_key(1), vec![reward_outpoint(&b1)], vec![pay(&test_key(2), reward)], 1);
        assert_eq!(f.ledger.check_transaction(&greedy, 2), Err(TxVerifyErr::InsufficientFunds));
    }

    #[test]
    fn coinbase_cannot_exceed_reward_and_fees() {
        let f = Fixture::new();
        let height = 1;
        let cb = coinbase_to(height, &test_key(1), map_height_to_block_reward(height) + 1);
        let block = mine_child(f.tip(), &f.tip().hash(), vec![cb], f.tip().header.bits);
        let mut ledger = f.ledger.clone();
        let err = ledger.apply(&block, &block.hash()).unwrap_err();
        assert_eq!(err.tx_err(), Some(&TxVerifyErr::InvalidCoinbase));
        assert_eq!(ledger, f.ledger);
    }

    #[test]
    fn immature_coinbase_is_locked() {
        let genesis = Block::genesis(&ChainConfig::regtest());
        let mut ledger = Ledger::new(2);
        ledger.apply(&genesis, &genesis.hash()).unwrap();
        let reward = map_height_to_block_reward(1);
        let b1 = mine_child(&genesis, &genesis.hash(), vec![coinbase_to(1, &test_key(1), reward)], genesis.header.bits);
        ledger.apply(&b1, &b1.hash()).unwrap();

        let spend = transfer(&test_key(1), vec![reward_outpoint(&b1)], vec![pay(&test_key(2), reward)], 0);
        assert_eq!(
            ledger.check_transaction(&spend, 2),
            Err(TxVerifyErr::CoinbaseOutSpentBeforeMaturation(reward_outpoint(&b1)))
        );
        assert!(ledger.check_transaction(&spend, 3).is_ok());
    }

    #[test]
    fn ticket_redeems_exactly_once() {
        let mut f = Fixture::new();
        let b1 = f.push(1, vec![]).unwrap();
        let alice = test_key(1);
        let reward = map_height_to_block_reward(1);
        let serials = SerialPair::new("LKC-0042", "F-9000");
        let locked = 10 * crate::consensus::COIN;

        let commit = commit_ticket(
            &alice,
            serials.clone(),
            locked,
            vec![reward_outpoint(&b1)],
            vec![pay(&alice, reward - locked - 100)],
            100,
        );
        f.push(2, vec![commit.clone()]).unwrap();

        let ticket = f.ledger.ticket(&serials).unwrap();
        assert_eq!(ticket.status, TicketStatus::Committed);
        assert_eq!(ticket.owner, address_of(&alice));
        assert_eq!(ticket.commit_tx, commit.hash());
        let balance_after_commit = f.ledger.balance_of(&address_of(&alice));
        assert_eq!(balance_after_commit, reward - locked - 100);

        // Someone else cannot claim it
        let stranger = redeem_value(&test_key(7), serials.clone(), 0);
        assert_eq!(f.ledger.check_transaction(&stranger, 3), Err(TxVerifyErr::OwnerMismatch));

        let redeem = redeem_value(&alice, serials.clone(), 500);
        f.push(2, vec![redeem.clone()]).unwrap();
        assert_eq!(f.ledger.ticket(&serials).unwrap().status, TicketStatus::Burned);
        assert_eq!(f.ledger.balance_of(&address_of(&alice)), balance_after_commit + locked - 500);
        assert_eq!(f.ledger.is_spent(&OutPoint::new(redeem.hash(), 0)), Some(false));

        let again = redeem_value(&alice, serials.clone(), 0);
        let err = f.ledger.check_transaction(&again, 4).unwrap_err();
        assert!(err.to_string().contains("ticket not COMMITTED"));

        let identity = redeem_identity(&alice, serials.clone(), b"alice");
        assert_eq!(
            f.ledger.check_transaction(&identity, 4),
            Err(TxVerifyErr::TicketNotCommitted(TicketStatus::Burned))
        );

        // Registering the same serial pair again fails
        let b4 = f.push(3, vec![]).unwrap();
        let dup = commit_ticket(
            &test_key(3),
            serials,
            1,
            vec![reward_outpoint(&b4)],
            vec![],
            0,
        );
        assert_eq!(f.ledger.check_transaction(&dup, 5), Err(TxVerifyErr::TicketExists));
    }

    #[test]
    fn rollback_unlinks_identity() {
        let mut f = Fixture::new();
        let b1 = f.push(1, vec![]).unwrap();
        let alice = test_key(1);
        let serials = SerialPair::new("LKC-7", "F-7");
        let commit = commit_ticket(&alice, serials.clone(), 5, vec![reward_outpoint(&b1)], vec![], 0);
        f.push(2, vec![commit]).unwrap();

        let snapshot = f.ledger.clone();
        let link = f.push(2, vec![redeem_identity(&alice, serials.clone(), b"{\"nick\":\"al\"}")]).unwrap();
        let ticket = f.ledger.ticket(&serials).unwrap();
        assert_eq!(ticket.status, TicketStatus::Linked);
        assert_eq!(f.ledger.undo_for(&link.hash()).unwrap().touched_serials(), vec![serials.clone()]);

        f.ledger.rollback(&link, &link.hash()).unwrap();
        assert_eq!(f.ledger, snapshot);
        assert_eq!(f.ledger.ticket(&serials).unwrap().profile, None);
    }

    #[test]
    fn rollback_requires_tip() {
        let mut f = Fixture::new();
        let b1 = f.push(1, vec![]).unwrap();
        f.push(1, vec![]).unwrap();
        assert_eq!(f.ledger.rollback(&b1, &b1.hash()), Err(LedgerErr::NotTip));
        assert_eq!(f.ledger.apply(&b1, &b1.hash()), Err(LedgerErr::NotTip));
    }

    #[test]
    fn stray_coinbase_is_rejected_by_check() {
        let f = Fixture::new();
        let cb = coinbase_to(1, &test_key(1), 1);
        assert_eq!(f.ledger.check_transaction(&cb, 1), Err(TxVerifyErr::UnexpectedCoinbase));
    }
}
