// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! LunaHash, the memory hard proof of work function.
//!
//! 1. Slot 0 of the scratchpad is `SHA-256(header || nonce_le)`.
//! 2. Slot `i` is `SHA-256(slot[i - 1] || slot[j])` where `j` is taken from the
//!    leading bytes of `slot[i - 1]` modulo `i`. Every step depends on the
//!    previous one and on an earlier slot, so the whole pad must stay resident.
//! 3. The completed scratchpad is folded through Keccak-256.
//!
//! The number of slots is the memory hardness knob. Consensus uses
//! [`LUNAHASH_SLOTS`](crate::consensus::LUNAHASH_SLOTS).

use crate::consensus::LUNAHASH_SLOTS;
use crate::primitives::Hash256;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Owns a scratchpad so repeated hashing does not reallocate. Each mining
/// thread holds its own instance.
#[derive(Clone)]
pub struct LunaHasher {
    scratchpad: Vec<[u8; 32]>,
}

impl LunaHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::with_slots(LUNAHASH_SLOTS)
    }

    /// Create a hasher with a custom scratchpad size. Sizes below 2 are raised to 2.
    #[must_use]
    pub fn with_slots(slots: usize) -> Self {
        Self {
            scratchpad: vec![[0; 32]; slots.max(2)],
        }
    }

    #[must_use]
    pub fn slots(&self) -> usize {
        self.scratchpad.len()
    }

    /// Memory footprint of a single evaluation, in bytes
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.scratchpad.len() * 32
    }

    pub fn hash(&mut self, header: &[u8], nonce: u64) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(header);
        hasher.update(nonce.to_le_bytes());
        self.scratchpad[0].copy_from_slice(&hasher.finalize());

        for i in 1..self.scratchpad.len() {
            let prev = self.scratchpad[i - 1];
            let mut idx = [0; 8];
            idx.copy_from_slice(&prev[..8]);
            let j = (u64::from_le_bytes(idx) % i as u64) as usize;

            let mut hasher = Sha256::new();
            hasher.update(prev);
            hasher.update(self.scratchpad[j]);
            self.scratchpad[i].copy_from_slice(&hasher.finalize());
        }

        let mut folder = Keccak256::new();
        for slot in &self.scratchpad {
            folder.update(slot);
        }

        let mut out = Hash256::zero();
        out.0.copy_from_slice(&folder.finalize());
        out
    }
}

impl Default for LunaHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot LunaHash with the consensus scratchpad size.
#[must_use]
pub fn luna_hash(header: &[u8], nonce: u64) -> Hash256 {
    LunaHasher::new().hash(header, nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use rand::prelude::*;

    fn hamming(a: &Hash256, b: &Hash256) -> u32 {
        a.0.iter()
            .zip(b.0.iter())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum()
    }

    #[test]
    fn it_is_deterministic() {
        let header = b"luna header bytes";
        let a = luna_hash(header, 42);
        let b = luna_hash(header, 42);
        assert_eq!(a, b);

        let mut hasher = LunaHasher::new();
        assert_eq!(hasher.hash(header, 42), a);
        // Reusing the scratchpad must not leak state between evaluations
        let _ = hasher.hash(b"something else", 7);
        assert_eq!(hasher.hash(header, 42), a);
    }

    #[quickcheck]
    fn nonce_changes_output(header: Vec<u8>, nonce: u64) -> bool {
        let mut hasher = LunaHasher::with_slots(16);
        hasher.hash(&header, nonce) != hasher.hash(&header, nonce.wrapping_add(1))
    }

    #[test]
    fn scratchpad_size_changes_output() {
        let mut small = LunaHasher::with_slots(8);
        let mut large = LunaHasher::with_slots(16);
        assert_eq!(small.memory_bytes(), 256);
        assert_ne!(small.hash(b"x", 0), large.hash(b"x", 0));
        assert_eq!(LunaHasher::with_slots(0).slots(), 2);
    }

    #[test]
    fn single_bit_flips_avalanche() {
        let mut rng = StdRng::seed_from_u64(0x4c55_4e41);
        let mut hasher = LunaHasher::with_slots(64);
        let samples = 128;
        let mut total = 0;

        for _ in 0..samples {
            let mut header = [0u8; 48];
            rng.fill(&mut header[..]);
            let nonce: u64 = rng.gen();
            let a = hasher.hash(&header, nonce);

            let bit = rng.gen_range(0..header.len() * 8);
            header[bit / 8] ^= 1 << (bit % 8);
            let b = hasher.hash(&header, nonce);

            let distance = hamming(&a, &b);
            assert!(distance > 64 && distance < 192, "weak diffusion: {distance}");
            total += distance;
        }

        // Expected mean is 128 with a standard deviation of ~0.7 over 128 samples
        let mean = total as f64 / samples as f64;
        assert!((120.0..136.0).contains(&mean), "mean distance {mean}");
    }

    #[test]
    fn output_bits_are_balanced() {
        let mut hasher = LunaHasher::with_slots(32);
        let mut ones = 0u32;
        let samples = 256u64;

        for nonce in 0..samples {
            ones += hasher
                .hash(b"balance", nonce)
                .0
                .iter()
                .map(|b| b.count_ones())
                .sum::<u32>();
        }

        let ratio = ones as f64 / (samples as f64 * 256.0);
        assert!((0.48..0.52).contains(&ratio), "ratio {ratio}");
    }
}
