// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::{BackendErr, ChainBackend, IndexEntry, WriteSet};
use crate::primitives::{Block, Hash256, Ticket};
use rocksdb::{
    ColumnFamilyDescriptor, IteratorMode, LogLevel, MultiThreaded, Options, TransactionDB,
    TransactionDBOptions,
};
use std::path::Path;
use triomphe::Arc;

pub type DB = TransactionDB<MultiThreaded>;

pub const BLOCKS_CF: &str = "blocks";
pub const CHAIN_INDEX_CF: &str = "chain_index";
pub const TICKETS_CF: &str = "tickets";
pub const META_CF: &str = "meta";

const TIP_KEY: &[u8] = b"tip";

#[derive(Clone)]
pub struct DiskBackend {
    db: Arc<DB>,
}

impl DiskBackend {
    pub fn new(db: Arc<DB>) -> Self {
        Self { db }
    }

    fn decode_all<T: bincode::Decode<()>>(&self, cf_name: &'static str) -> Result<Vec<T>, BackendErr> {
        let cf = self.db.cf_handle(cf_name).ok_or(BackendErr::CorruptData)?;
        let mut out = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            out.push(crate::codec::decode(&value)?);
        }

        Ok(out)
    }
}

impl ChainBackend for DiskBackend {
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, BackendErr> {
        let cf = self.db.cf_handle(BLOCKS_CF).ok_or(BackendErr::CorruptData)?;
        match self.db.get_cf(&cf, hash.as_bytes())? {
            Some(bytes) => Ok(Some(crate::codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_index_entry(&self, hash: &Hash256) -> Result<Option<IndexEntry>, BackendErr> {
        let cf = self.db.cf_handle(CHAIN_INDEX_CF).ok_or(BackendErr::CorruptData)?;
        match self.db.get_cf(&cf, hash.as_bytes())? {
            Some(bytes) => Ok(Some(crate::codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn index_entries(&self) -> Result<Vec<IndexEntry>, BackendErr> {
        self.decode_all(CHAIN_INDEX_CF)
    }

    fn tickets(&self) -> Result<Vec<Ticket>, BackendErr> {
        self.decode_all(TICKETS_CF)
    }

    fn tip(&self) -> Result<Option<Hash256>, BackendErr> {
        let cf = self.db.cf_handle(META_CF).ok_or(BackendErr::CorruptData)?;
        match self.db.get_cf(&cf, TIP_KEY)? {
            Some(bytes) if bytes.len() == 32 => {
                let mut out = Hash256::zero();
                out.0.copy_from_slice(&bytes);
                Ok(Some(out))
            }
            Some(_) => Err(BackendErr::CorruptData),
            None => Ok(None),
        }
    }

    fn commit(&self, writes: WriteSet) -> Result<(), BackendErr> {
        let blocks_cf = self.db.cf_handle(BLOCKS_CF).ok_or(BackendErr::CorruptData)?;
        let index_cf = self.db.cf_handle(CHAIN_INDEX_CF).ok_or(BackendErr::CorruptData)?;
        let tickets_cf = self.db.cf_handle(TICKETS_CF).ok_or(BackendErr::CorruptData)?;
        let meta_cf = self.db.cf_handle(META_CF).ok_or(BackendErr::CorruptData)?;
        let tx = self.db.transaction();

        for (hash, block) in &writes.blocks {
            tx.put_cf(&blocks_cf, hash.as_bytes(), crate::codec::encode_to_vec(block)?)?;
        }

        for entry in &writes.index_entries {
            tx.put_cf(&index_cf, entry.hash.as_bytes(), crate::codec::encode_to_vec(entry)?)?;
        }

        for serials in &writes.removed_tickets {
            tx.delete_cf(&tickets_cf, serials.to_key())?;
        }

        for ticket in &writes.tickets {
            tx.put_cf(&tickets_cf, ticket.serials.to_key(), crate::codec::encode_to_vec(ticket)?)?;
        }

        if let Some(tip) = writes.tip {
            tx.put_cf(&meta_cf, TIP_KEY, tip.as_bytes())?;
        }

        tx.commit()?;
        Ok(())
    }
}

/// Opens or creates the chain store at `path`
pub fn create_rocksdb_backend<P: AsRef<Path>>(path: P) -> Result<DiskBackend, BackendErr> {
    let mut cf_opts = Options::default();
    cf_opts.set_max_write_buffer_number(3);
    let cfs = vec![
        ColumnFamilyDescriptor::new(BLOCKS_CF, cf_opts.clone()),
        ColumnFamilyDescriptor::new(CHAIN_INDEX_CF, cf_opts.clone()),
        ColumnFamilyDescriptor::new(TICKETS_CF, cf_opts.clone()),
        ColumnFamilyDescriptor::new(META_CF, cf_opts),
    ];

    let mut db_opts = Options::default();
    db_opts.create_missing_column_families(true);
    db_opts.create_if_missing(true);
    db_opts.set_log_level(LogLevel::Warn);
    db_opts.set_keep_log_file_num(1);
    let db = DB::open_cf_descriptors(&db_opts, &TransactionDBOptions::default(), path, cfs)?;
    Ok(DiskBackend::new(Arc::new(db)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainConfig;
    use crate::primitives::{Hash256, SerialPair, TicketStatus};
    use crate::test_util::*;
    use rand::Rng;

    fn temp_path() -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(hex::encode(rand::thread_rng().gen::<[u8; 32]>()));
        path.push("Lunacoin");
        path
    }

    #[test]
    fn it_persists_across_reopen() {
        let path = temp_path();
        let genesis = Block::genesis(&ChainConfig::regtest());
        let hash = genesis.hash();
        let ticket = Ticket {
            serials: SerialPair::new("LKC-1", "F-1"),
            artifact_hash: Hash256::zero(),
            owner: address_of(&test_key(1)),
            locked_value: 5,
            status: TicketStatus::Committed,
            profile: None,
            commit_tx: Hash256::zero(),
            commit_height: 1,
        };

        {
            let backend = create_rocksdb_backend(&path).unwrap();
            backend
                .commit(WriteSet {
                    blocks: vec![(hash, genesis.clone())],
                    index_entries: vec![IndexEntry::genesis(&genesis, hash)],
                    tickets: vec![ticket.clone()],
                    removed_tickets: vec![],
                    tip: Some(hash),
                })
                .unwrap();
        }

        let backend = create_rocksdb_backend(&path).unwrap();
        assert_eq!(backend.tip().unwrap(), Some(hash));
        assert_eq!(backend.get_block(&hash).unwrap(), Some(genesis.clone()));
        assert_eq!(backend.index_entries().unwrap(), vec![IndexEntry::genesis(&genesis, hash)]);
        assert_eq!(backend.tickets().unwrap(), vec![ticket.clone()]);

        backend
            .commit(WriteSet {
                removed_tickets: vec![ticket.serials],
                ..Default::default()
            })
            .unwrap();
        assert!(backend.tickets().unwrap().is_empty());
        let _ = std::fs::remove_dir_all(path);
    }
}
