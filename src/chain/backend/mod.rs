// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::IndexEntry;
use crate::primitives::{Block, Hash256, SerialPair, Ticket};
use bincode::error::{DecodeError as BincodeDecodeErr, EncodeError as BincodeEncodeErr};
use std::fmt;

#[cfg(feature = "disk")]
use rocksdb::Error as RocksDBErr;

/// Writes produced by a single chain state transition. A backend must persist
/// all of them or none.
#[derive(Debug, Default, Clone)]
pub struct WriteSet {
    pub blocks: Vec<(Hash256, Block)>,
    pub index_entries: Vec<IndexEntry>,
    pub tickets: Vec<Ticket>,
    pub removed_tickets: Vec<SerialPair>,
    pub tip: Option<Hash256>,
}

impl WriteSet {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
            && self.index_entries.is_empty()
            && self.tickets.is_empty()
            && self.removed_tickets.is_empty()
            && self.tip.is_none()
    }
}

/// Persistence used by the chain state manager.
///
/// Blocks are append only and keyed by hash. The index maps every known block
/// hash to its [`IndexEntry`]. The ticket snapshot mirrors the registry at the
/// persisted tip.
pub trait ChainBackend: Send + Sync + 'static {
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, BackendErr>;

    fn get_index_entry(&self, hash: &Hash256) -> Result<Option<IndexEntry>, BackendErr>;

    /// Every index entry in no particular order
    fn index_entries(&self) -> Result<Vec<IndexEntry>, BackendErr>;

    fn tickets(&self) -> Result<Vec<Ticket>, BackendErr>;

    /// Persisted canonical tip, `None` on a fresh store
    fn tip(&self) -> Result<Option<Hash256>, BackendErr>;

    /// Atomically persist a write set
    fn commit(&self, writes: WriteSet) -> Result<(), BackendErr>;

    fn has_block(&self, hash: &Hash256) -> Result<bool, BackendErr> {
        Ok(self.get_index_entry(hash)?.is_some())
    }
}

#[derive(Debug)]
pub enum BackendErr {
    /// Backend data is corrupted
    CorruptData,

    /// Rocksdb error
    #[cfg(feature = "disk")]
    RocksDB(RocksDBErr),

    /// Bincode encode error
    BincodeEncode(BincodeEncodeErr),

    /// Bincode decode error
    BincodeDecode(BincodeDecodeErr),

    /// Generic error
    Error(&'static str),
}

impl fmt::Display for BackendErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptData => f.write_str("backend data is corrupted"),
            #[cfg(feature = "disk")]
            Self::RocksDB(err) => write!(f, "rocksdb: {err}"),
            Self::BincodeEncode(err) => write!(f, "encode: {err}"),
            Self::BincodeDecode(err) => write!(f, "decode: {err}"),
            Self::Error(err) => f.write_str(err),
        }
    }
}

#[cfg(feature = "disk")]
impl From<RocksDBErr> for BackendErr {
    fn from(other: RocksDBErr) -> Self {
        Self::RocksDB(other)
    }
}

impl From<BincodeEncodeErr> for BackendErr {
    fn from(other: BincodeEncodeErr) -> Self {
        Self::BincodeEncode(other)
    }
}

impl From<BincodeDecodeErr> for BackendErr {
    fn from(other: BincodeDecodeErr) -> Self {
        Self::BincodeDecode(other)
    }
}

#[cfg(feature = "disk")]
pub mod disk;
pub mod memory;

#[cfg(feature = "disk")]
pub use disk::*;
pub use memory::*;
