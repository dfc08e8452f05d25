// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::{Money, MAX_SERIAL_LEN};
use crate::primitives::{Address, Hash256};
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two serial numbers printed on a paper ticket. Together they identify
/// the ticket on chain.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode, Serialize, Deserialize,
)]
pub struct SerialPair {
    pub primary: String,
    pub secondary: String,
}

impl SerialPair {
    pub fn new(primary: &str, secondary: &str) -> Self {
        Self {
            primary: primary.to_owned(),
            secondary: secondary.to_owned(),
        }
    }

    /// Serials must be non-empty printable ASCII of bounded length
    pub fn is_well_formed(&self) -> bool {
        let ok = |s: &str| {
            !s.is_empty() && s.len() <= MAX_SERIAL_LEN && s.bytes().all(|b| b.is_ascii_graphic())
        };
        ok(&self.primary) && ok(&self.secondary)
    }

    /// Storage key: both serials, length prefixed so pairs never collide
    pub fn to_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(2 + self.primary.len() + self.secondary.len());
        key.push(self.primary.len() as u8);
        key.extend_from_slice(self.primary.as_bytes());
        key.push(self.secondary.len() as u8);
        key.extend_from_slice(self.secondary.as_bytes());
        key
    }
}

impl fmt::Debug for SerialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerialPair({}/{})", self.primary, self.secondary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum TicketStatus {
    Committed,
    Linked,
    Burned,
}

impl TicketStatus {
    /// Only committed tickets may move, and only forward
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (Self::Committed, Self::Linked) | (Self::Committed, Self::Burned)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed => f.write_str("COMMITTED"),
            Self::Linked => f.write_str("LINKED"),
            Self::Burned => f.write_str("BURNED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Ticket {
    pub serials: SerialPair,

    /// Commitment to the off-chain artwork
    pub artifact_hash: Hash256,

    /// Address of the committing key. Redemptions must be signed by a key hashing to it.
    pub owner: Address,

    pub locked_value: Money,
    pub status: TicketStatus,

    /// Identity profile stored by a linking redemption
    pub profile: Option<Vec<u8>>,

    /// Transaction that created the ticket
    pub commit_tx: Hash256,
    pub commit_height: u64,
}
