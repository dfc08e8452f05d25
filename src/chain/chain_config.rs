// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::consensus::RETARGET_INTERVAL;

/// Per network consensus and networking parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    network_name: &'static str,

    /// Wire protocol magic prefix
    pub magic: [u8; 4],

    /// Default p2p listen port
    pub default_port: u16,

    /// Default RPC listen port
    pub rpc_port: u16,

    pub genesis_timestamp: i64,

    /// Easiest allowed target, also the genesis target
    pub pow_limit_bits: u32,

    pub retarget_interval: u64,

    /// Coinbase outputs can be spent only `n` blocks after their creation
    pub coinbase_maturity: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::testnet()
    }
}

impl ChainConfig {
    /// Returns `None` for unknown network names
    pub fn new(network_name: &str) -> Option<Self> {
        match network_name {
            "mainnet" => Some(Self::mainnet()),
            "testnet" => Some(Self::testnet()),
            "regtest" => Some(Self::regtest()),
            _ => None,
        }
    }

    pub fn mainnet() -> Self {
        Self {
            network_name: "mainnet",
            magic: *b"LUNA",
            default_port: 9333,
            rpc_port: 9332,
            genesis_timestamp: 1_704_067_200,
            pow_limit_bits: 0x1f00_ffff,
            retarget_interval: RETARGET_INTERVAL,
            coinbase_maturity: 100,
        }
    }

    pub fn testnet() -> Self {
        Self {
            network_name: "testnet",
            magic: *b"LUNT",
            default_port: 19333,
            rpc_port: 19332,
            genesis_timestamp: 1_704_067_201,
            pow_limit_bits: 0x1f00_ffff,
            retarget_interval: RETARGET_INTERVAL,
            coinbase_maturity: 100,
        }
    }

    /// Local testing network. Blocks are found in a couple of hashes.
    pub fn regtest() -> Self {
        Self {
            network_name: "regtest",
            magic: *b"LUNR",
            default_port: 29333,
            rpc_port: 29332,
            genesis_timestamp: 1_700_000_000,
            pow_limit_bits: 0x207f_ffff,
            retarget_interval: RETARGET_INTERVAL,
            coinbase_maturity: 0,
        }
    }

    pub fn network_name(&self) -> &'static str {
        self.network_name
    }

    /// Returns true if `height` starts a new difficulty period
    pub fn is_retarget_height(&self, height: u64) -> bool {
        height > 0 && height % self.retarget_interval == 0
    }
}
