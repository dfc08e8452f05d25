// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! # Lunacoin
//! Official implementation of Lunacoin, a proof of work chain that binds
//! physical, serially numbered tickets to on chain identities and value.
//!
//! ## Features
//! * **Memory hard PoW**: LunaHash fills a scratchpad of chained SHA-256 slots
//!   before folding it through Keccak-256, so mining is bound by memory latency
//!   rather than raw hashing speed.
//! * **Ticket redemption in consensus**: a ticket is committed with locked
//!   value, then redeemed exactly once, either linking an identity profile or
//!   burning the ticket to release its value. Transitions are validated and
//!   rolled back with the blocks that carry them.
//! * **Heaviest chain**: blocks form a hash indexed graph. The tip follows
//!   the branch with the most cumulative work, reorganising the ledger through
//!   undo records when a heavier branch appears.
//!
//! ## Layout
//! * [`primitives`]: hashes, addresses, transactions, blocks and LunaHash.
//! * [`consensus`]: emission schedule and difficulty arithmetic.
//! * [`chain`]: ledger, block index, redemption rules and the chain state manager.
//! * [`node`]: mempool, wire protocol, peers and the RPC service.
//! * [`miner`]: multi threaded nonce search.

pub mod chain;
pub mod codec;
pub mod consensus;
pub mod global;
pub mod miner;
pub mod node;
pub mod primitives;
pub mod settings;

#[cfg(test)]
mod test_util;
