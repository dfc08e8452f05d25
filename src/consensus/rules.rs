// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use static_assertions::*;
use std::cmp;

/// Money type, expressed in base units
pub type Money = u64;

/// Base units per LNC
pub const COIN: Money = 100_000_000;

/// Difficulty will be adjusted so that blocks are added in `n` secs
pub const BLOCK_TIME_SECONDS: u64 = 60;

/// Difficulty is recomputed every `n` blocks
pub const RETARGET_INTERVAL: u64 = 2016;

/// A single retarget can move the target by at most this factor in either direction
pub const MAX_RETARGET_FACTOR: u64 = 4;

/// New block with timestamps greater than `current_time + n` will be rejected. Expressed in seconds
pub const BLOCK_TIMESTAMP_MAX_FUTURE: i64 = 7200;

/// Maximum block size in bytes
pub const MAX_BYTES_PER_BLOCK: usize = 1_000_000;

/// Max bytes per transaction
pub const TRANSACTION_LIMIT_SIZE: usize = 100_000;

/// Max bytes of an identity profile attached to a ticket redemption
pub const MAX_PROFILE_BYTES: usize = 1024;

/// Max length of a ticket serial
pub const MAX_SERIAL_LEN: usize = 64;

/// Initial block reward
pub const INITIAL_BLOCK_REWARD: Money = COIN * 50;

/// Reward is halved after `n` blocks
pub const HALVING_INTERVAL: u64 = 210_000;

/// Only `n` halvings will happen, after which the block reward will remain constant
pub const MAX_HALVINGS: u64 = 32;

/// Number of 32 byte scratchpad slots used by LunaHash
pub const LUNAHASH_SLOTS: usize = 2048;

/// Get block reward at height
pub fn map_height_to_block_reward(height: u64) -> Money {
    let h = cmp::min(height / HALVING_INTERVAL, MAX_HALVINGS);

    if h >= 64 {
        return 0;
    }

    INITIAL_BLOCK_REWARD >> h
}

/// Total coins issued by block rewards up to and including `height`
pub fn issued_at_height(height: u64) -> Money {
    let mut total: Money = 0;
    let mut start = 0;

    while start <= height {
        let end = cmp::min(height, start + HALVING_INTERVAL - 1);
        let reward = map_height_to_block_reward(start);

        if reward == 0 {
            break;
        }

        total = total.saturating_add(reward.saturating_mul(end - start + 1));
        start += HALVING_INTERVAL;
    }

    total
}

const_assert!(COIN > 0);
const_assert!(MAX_RETARGET_FACTOR > 1);
const_assert!(RETARGET_INTERVAL > 1);
const_assert!(TRANSACTION_LIMIT_SIZE < MAX_BYTES_PER_BLOCK);
const_assert!(LUNAHASH_SLOTS >= 2);
const_assert_eq!(INITIAL_BLOCK_REWARD % (1 << 8), 0);
