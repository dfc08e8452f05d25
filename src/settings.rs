// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Node settings, read in this order of precedence:
//!
//! 1. `lunacoin_<section>_<key>` environment variables, with the key's
//!    underscores removed (e.g. `lunacoin_node_networkname=regtest`)
//! 2. `<config dir>/Lunacoin/config.toml`, written with defaults on first run
//! 3. Built in defaults

use crate::chain::{ChainConfig, ChainOptions};
use crate::primitives::Address;
use config::{Config, ConfigError, File};
use lazy_static::*;
use log::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, metadata, File as FsFile};
use std::io::Write;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use struct_field_names_as_array::FieldNamesAsArray;

const ENV_PREFIX: &str = "lunacoin";

lazy_static! {
    pub static ref SETTINGS: Settings = Settings::new().unwrap_or_else(|err| {
        error!("Could not load settings, using defaults. Reason: {}", err);
        Settings::default()
    });
}

#[derive(Debug, Serialize, Deserialize, Default, FieldNamesAsArray)]
pub struct Settings {
    /// Network settings.
    pub network: Network,

    /// Node settings.
    pub node: Node,

    /// Miner settings.
    pub miner: Miner,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = config_file_path();

        // Create default configuration
        if metadata(&config_path).is_err() {
            write_default_config(&config_path);
        }

        Self::from_sources(Some(config_path), std::env::vars().collect())
    }

    /// Builds settings from an optional config file and a list of
    /// environment variables, over the defaults.
    pub fn from_sources(config_path: Option<PathBuf>, env_source: Vec<(String, String)>) -> Result<Self, ConfigError> {
        let default_settings = Settings::default();
        let mut s = Config::builder();

        if let Some(path) = config_path {
            s = s.add_source(File::from(path).required(false));
        }

        // Set defaults
        let defaults: HashMap<String, HashMap<String, DynamicConfVal>> = serde_yaml::to_value(&default_settings)
            .and_then(serde_yaml::from_value)
            .map_err(|err| ConfigError::Message(err.to_string()))?;

        for (k1, inner) in &defaults {
            for (k2, v) in inner {
                let key = format!("{k1}.{k2}");

                match v {
                    DynamicConfVal::String(v) => {
                        s = s.set_default(key, v.as_str())?;
                    }

                    DynamicConfVal::Bool(v) => {
                        s = s.set_default(key, *v)?;
                    }

                    DynamicConfVal::U64(v) => {
                        s = s.set_default(key, *v)?;
                    }

                    DynamicConfVal::Sequence(v) => {
                        s = s.set_default(key, v.clone())?;
                    }

                    DynamicConfVal::Option(v) => {
                        if let Some(v) = v {
                            s = s.set_default(key, v.as_str())?;
                        }
                    }
                }
            }
        }

        // Make sure to list these in order
        let settings_modules: Vec<_> = vec![
            Network::FIELD_NAMES_AS_ARRAY,
            Node::FIELD_NAMES_AS_ARRAY,
            Miner::FIELD_NAMES_AS_ARRAY,
        ];

        // Gather all possible settings keys
        let possible_keys: HashMap<String, String> = Settings::FIELD_NAMES_AS_ARRAY
            .iter()
            .zip(settings_modules)
            .flat_map(|(section, fields)| {
                fields.iter().map(move |field| {
                    (
                        format!("{}_{}_{}", ENV_PREFIX, section, field.replace('_', "")),
                        format!("{section}.{field}"),
                    )
                })
            })
            .collect();

        // Env vars are matched manually as the `config` crate `Environment`
        // source cannot tell section separators from underscores in keys.
        for (k, v) in &env_source {
            if let Some(key) = possible_keys.get(&k.to_lowercase()) {
                // Filter empty values
                if v.is_empty() {
                    continue;
                }

                s = s.set_override(key.as_str(), v.as_str())?;
            }
        }

        s.build()?.try_deserialize()
    }

    /// Checks values that deserialize fine but cannot be used
    pub fn validate(&self) -> Result<(), String> {
        let chain_config = self.chain_config()?;

        if self.network.listen_addr.parse::<IpAddr>().is_err() {
            return Err(format!("invalid listen address: {}", self.network.listen_addr));
        }

        if self.network.rpc_enabled && (self.network.rpc_username.is_empty() || self.network.rpc_password.is_empty()) {
            return Err("RPC is enabled but no credentials are set".to_owned());
        }

        if self.node.mempool_size == 0 {
            return Err("mempool_size must be greater than 0".to_owned());
        }

        if self.miner.enabled {
            match self.miner.coinbase_address {
                Some(ref addr) if Address::from_bech32(addr).is_ok() => {}
                Some(ref addr) => return Err(format!("invalid coinbase address: {addr}")),
                None => return Err("mining is enabled but no coinbase address is set".to_owned()),
            }
        }

        if !self.node.memory_only && self.node.data_dir.is_empty() {
            return Err("data_dir must be set unless running in memory only mode".to_owned());
        }

        debug!("Settings validated for {}", chain_config.network_name());
        Ok(())
    }

    pub fn chain_config(&self) -> Result<ChainConfig, String> {
        ChainConfig::new(&self.node.network_name)
            .ok_or_else(|| format!("invalid network name: {}", self.node.network_name))
    }

    pub fn chain_options(&self) -> ChainOptions {
        ChainOptions {
            orphan_capacity: self.node.orphan_pool_size as usize,
            mempool_capacity: self.node.mempool_size as usize,
            mempool_expiry: i64::from(self.node.mempool_expiry_hours) * 60 * 60,
        }
    }

    /// P2P listen address, using the network's default port when unset
    pub fn p2p_listen_addr(&self, chain_config: &ChainConfig) -> Option<SocketAddr> {
        let ip: IpAddr = self.network.listen_addr.parse().ok()?;
        let port = match self.network.listen_port {
            0 => chain_config.default_port,
            port => port,
        };
        Some(SocketAddr::new(ip, port))
    }

    pub fn rpc_port(&self, chain_config: &ChainConfig) -> u16 {
        match self.network.rpc_port {
            0 => chain_config.rpc_port,
            port => port,
        }
    }

    /// Resolves seed entries. Entries without a port use the network default.
    pub fn seed_addrs(&self, chain_config: &ChainConfig) -> Vec<SocketAddr> {
        self.network
            .seeds
            .iter()
            .flat_map(|seed| {
                let resolved = if seed.contains(':') {
                    seed.to_socket_addrs()
                } else {
                    (seed.as_str(), chain_config.default_port).to_socket_addrs()
                };

                match resolved {
                    Ok(addrs) => addrs.collect::<Vec<_>>(),
                    Err(err) => {
                        warn!("Could not resolve seed {}: {}", seed, err);
                        vec![]
                    }
                }
            })
            .collect()
    }

    pub fn coinbase_address(&self) -> Option<Address> {
        self.miner
            .coinbase_address
            .as_deref()
            .and_then(|addr| Address::from_bech32(addr).ok())
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Network {
    /// Node listen address.
    #[serde(alias = "listenaddr")]
    pub listen_addr: String,

    /// Node listen port. 0 means the network default.
    #[serde(alias = "listenport")]
    pub listen_port: u16,

    /// Enable RPC.
    #[serde(alias = "rpcenabled")]
    pub rpc_enabled: bool,

    /// RPC listen port. 0 means the network default.
    #[serde(alias = "rpcport")]
    pub rpc_port: u16,

    /// RPC username.
    #[serde(alias = "rpcusername")]
    pub rpc_username: String,

    /// RPC password.
    #[serde(alias = "rpcpassword")]
    pub rpc_password: String,

    /// Peers to connect to on startup, as `host` or `host:port`.
    pub seeds: Vec<String>,

    /// Max simultaneous peer connections.
    #[serde(alias = "maxpeers")]
    pub max_peers: u16,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_owned(),
            listen_port: 0,
            rpc_enabled: true,
            rpc_port: 0,
            rpc_username: "lunacoin".to_owned(),
            rpc_password: "lunacoin".to_owned(),
            seeds: vec![],
            max_peers: 32,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, FieldNamesAsArray)]
pub struct Node {
    /// The network name the node is listening on.
    #[serde(alias = "networkname")]
    pub network_name: String,

    /// Number of block verification threads.
    ///
    /// Default is 0 which means the number of cores of the system
    #[serde(alias = "verifierthreads")]
    pub verifier_threads: u16,

    /// Number of threads used for network communication and the RPC interface.
    ///
    /// Default is 0 which means the number of cores of the system
    #[serde(alias = "networkthreads")]
    pub network_threads: u16,

    /// Node data directory
    #[serde(alias = "datadir")]
    pub data_dir: String,

    /// If specified, we won't be storing anything to disk.
    #[serde(alias = "memoryonly")]
    pub memory_only: bool,

    /// Max number of mempool transactions
    #[serde(alias = "mempoolsize")]
    pub mempool_size: u32,

    /// Max number of parked orphan blocks
    #[serde(alias = "orphanpoolsize")]
    pub orphan_pool_size: u32,

    /// Hours after which unconfirmed transactions are dropped
    #[serde(alias = "mempoolexpiryhours")]
    pub mempool_expiry_hours: u16,
}

impl Default for Node {
    fn default() -> Self {
        let path = dirs::data_dir()
            .map(|mut path| {
                path.push("Lunacoin");
                path
            })
            .unwrap_or_else(|| PathBuf::from(".lunacoin"));

        Self {
            network_name: "mainnet".to_owned(),
            verifier_threads: 0,
            network_threads: 0,
            data_dir: path.to_string_lossy().into_owned(),
            memory_only: false,
            mempool_size: crate::node::DEFAULT_MEMPOOL_CAPACITY as u32,
            orphan_pool_size: crate::chain::DEFAULT_ORPHAN_CAPACITY as u32,
            mempool_expiry_hours: (crate::node::DEFAULT_MEMPOOL_EXPIRY / 3600) as u16,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, FieldNamesAsArray)]
pub struct Miner {
    /// Run the miner.
    pub enabled: bool,

    /// Send coinbase UTXOs to the given address.
    #[serde(alias = "coinbaseaddress")]
    pub coinbase_address: Option<String>,

    /// Number of miner threads
    ///
    /// Default is 0 which means the number of cores of the system
    #[serde(alias = "minerthreads")]
    pub miner_threads: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DynamicConfVal {
    String(String),
    Sequence(Vec<String>),
    Option(Option<String>),
    Bool(bool),
    U64(u64),
}

fn config_file_path() -> PathBuf {
    let mut config_path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config_path.push("Lunacoin");
    config_path.push("config.toml");
    config_path
}

fn write_default_config(config_path: &PathBuf) {
    let settings_str = match toml::ser::to_string_pretty(&Settings::default()) {
        Ok(s) => s,
        Err(err) => {
            error!("Failed to serialize default configuration! Reason: {}", err);
            return;
        }
    };

    if let Some(parent) = config_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    match FsFile::create(config_path) {
        Ok(mut file) => {
            file.write_all(settings_str.as_bytes()).unwrap_or(());
        }
        Err(err) => {
            // Fall back to environment variables
            error!("Failed to create configuration! Reason: {:#?}", err);
        }
    }
}
