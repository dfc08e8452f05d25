// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Compact difficulty bits, targets and chain work.
//!
//! Bits use the compact encoding `exponent(8) | mantissa(24)` where the
//! target equals `mantissa * 256^(exponent - 3)`. A hash meets the target
//! when, read as a big endian integer, it is less than or equal to it.

use crate::consensus::{BLOCK_TIME_SECONDS, MAX_RETARGET_FACTOR};
use crate::primitives::Hash256;
use bincode::de::Decoder;
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use ibig::UBig;
use std::fmt;
use std::ops::Add;

/// Expand compact bits into a full target. Returns `None` for negative,
/// zero or overflowing encodings.
pub fn target_from_bits(bits: u32) -> Option<UBig> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007f_ffff;

    if bits & 0x0080_0000 != 0 || mantissa == 0 {
        return None;
    }

    let target = if exponent <= 3 {
        UBig::from(mantissa >> (8 * (3 - exponent)))
    } else {
        UBig::from(mantissa) << (8 * (exponent - 3))
    };

    if target == UBig::from(0u8) || target.bit_len() > 256 {
        return None;
    }

    Some(target)
}

/// Compress a target into compact bits. Precision below the top 3 bytes is lost.
pub fn bits_from_target(target: &UBig) -> u32 {
    let mut size = (target.bit_len() + 7) / 8;
    let mut compact = if size <= 3 {
        u32::try_from(target).unwrap_or(0) << (8 * (3 - size))
    } else {
        u32::try_from(&(target >> (8 * (size - 3)))).unwrap_or(0)
    };

    // The mantissa sign bit must stay clear
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }

    compact | ((size as u32) << 24)
}

/// Returns true if the hash, read big endian, is at or below the target encoded by `bits`.
pub fn hash_meets_bits(hash: &Hash256, bits: u32) -> bool {
    match target_from_bits(bits) {
        Some(target) => UBig::from_be_bytes(&hash.0) <= target,
        None => false,
    }
}

/// Expected number of hashes needed to meet `bits`: `2^256 / (target + 1)`.
pub fn work_from_bits(bits: u32) -> UBig {
    match target_from_bits(bits) {
        Some(target) => (UBig::from(1u8) << 256) / (target + UBig::from(1u8)),
        None => UBig::from(0u8),
    }
}

/// Calculate new bits based on the time it took to produce the last
/// `interval` blocks. The adjustment is clamped to `MAX_RETARGET_FACTOR`
/// in either direction and never exceeds `pow_limit_bits`.
pub fn calc_next_bits(prev_bits: u32, actual_timespan: i64, interval: u64, pow_limit_bits: u32) -> u32 {
    let expected = (interval * BLOCK_TIME_SECONDS) as i64;
    let factor = MAX_RETARGET_FACTOR as i64;
    let actual = actual_timespan.clamp(expected / factor, expected * factor);

    let limit = match target_from_bits(pow_limit_bits) {
        Some(limit) => limit,
        None => return pow_limit_bits,
    };

    let old = match target_from_bits(prev_bits) {
        Some(old) => old,
        None => return pow_limit_bits,
    };

    let mut new = old * UBig::from(actual as u64) / UBig::from(expected as u64);

    if new > limit {
        new = limit;
    }

    if new == UBig::from(0u8) {
        new = UBig::from(1u8);
    }

    bits_from_target(&new)
}

/// Cumulative proof of work of a branch.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainWork(pub UBig);

impl ChainWork {
    pub fn zero() -> Self {
        Self(UBig::from(0u8))
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(work_from_bits(bits))
    }

    pub fn to_hex(&self) -> String {
        format!("{:x}", self.0)
    }
}

impl Add<&ChainWork> for &ChainWork {
    type Output = ChainWork;

    fn add(self, other: &ChainWork) -> ChainWork {
        ChainWork(&self.0 + &other.0)
    }
}

impl fmt::Debug for ChainWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ChainWork").field(&self.to_hex()).finish()
    }
}

impl Encode for ChainWork {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let bytes = self.0.to_be_bytes();
        Encode::encode(&bytes, encoder)
    }
}

impl<Context> Decode<Context> for ChainWork {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let bytes: Vec<u8> = Decode::decode(decoder)?;

        if bytes.len() > 64 {
            return Err(DecodeError::Other("chain work overflow"));
        }

        Ok(Self(UBig::from_be_bytes(&bytes)))
    }
}

bincode::impl_borrow_decode!(ChainWork);
