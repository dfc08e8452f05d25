// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::ChainConfig;
use crate::primitives::{Block, Hash256};
use lazy_static::*;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use triomphe::Arc;

type GenesisCache = RwLock<HashMap<&'static str, (Arc<Block>, Hash256)>>;

lazy_static! {
    /// Set on the first termination signal or on a fatal chain error
    pub static ref EXIT_SIGNAL: std::sync::Arc<AtomicBool> = std::sync::Arc::new(AtomicBool::new(false));

    /// Process start time as a unix timestamp
    pub static ref STARTUP_TIME: i64 = unix_now();

    /// Genesis blocks cache, keyed by network name
    static ref GENESIS_CACHE: GenesisCache = RwLock::new(HashMap::with_capacity(3));
}

/// Initialize globals
pub fn init() {
    lazy_static::initialize(&STARTUP_TIME);
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Seconds since startup
pub fn uptime() -> u64 {
    (unix_now() - *STARTUP_TIME).max(0) as u64
}

pub fn request_exit() {
    EXIT_SIGNAL.store(true, Ordering::SeqCst);
}

pub fn exit_requested() -> bool {
    EXIT_SIGNAL.load(Ordering::Relaxed)
}

/// Genesis block and its hash for the given network
pub fn get_cached_genesis(chain_config: &ChainConfig) -> (Arc<Block>, Hash256) {
    let key = chain_config.network_name();
    let cache = GENESIS_CACHE.upgradable_read();

    if let Some(cached) = cache.get(key) {
        return cached.clone();
    }

    let mut cache = RwLockUpgradableReadGuard::upgrade(cache);
    cache
        .entry(key)
        .or_insert_with(|| {
            let genesis = Block::genesis(chain_config);
            let hash = genesis.hash();
            (Arc::new(genesis), hash)
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_cached_per_network() {
        let regtest = ChainConfig::regtest();
        let (a, hash_a) = get_cached_genesis(&regtest);
        let (b, hash_b) = get_cached_genesis(&regtest);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(hash_a, hash_b);
        assert_eq!(hash_a, Block::genesis(&regtest).hash());

        let (_, mainnet) = get_cached_genesis(&ChainConfig::mainnet());
        assert_ne!(mainnet, hash_a);
    }
}
