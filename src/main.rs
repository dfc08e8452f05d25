// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use anyhow::anyhow;
use log::*;
use lunacoin::chain::*;
use lunacoin::global::*;
use lunacoin::node::*;
use lunacoin::settings::SETTINGS;
use mimalloc::MiMalloc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::runtime::Builder;
use tokio::time::sleep;
use tracing_subscriber::prelude::*;
use triomphe::Arc;

#[cfg(feature = "rpc")]
use tarpc::server::{self, Channel};

#[cfg(not(windows))]
use signal_hook::consts::TERM_SIGNALS;
#[cfg(not(windows))]
use signal_hook::flag;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> anyhow::Result<()> {
    lunacoin::global::init();

    #[cfg(not(windows))]
    for sig in TERM_SIGNALS {
        // When terminated by a second term signal, exit with exit code 1.
        // This will do nothing the first time (because term_now is false).
        flag::register_conditional_shutdown(*sig, 1, EXIT_SIGNAL.clone())?;
        // But this will "arm" the above for the second time, by setting it to true.
        // The order of registering these is important, if you put this one first, it will
        // first arm and then terminate all in the first round.
        flag::register(*sig, EXIT_SIGNAL.clone())?;
    }

    init_tracing()?;
    SETTINGS.validate().map_err(|err| anyhow!(err))?;

    let worker_threads = match SETTINGS.node.network_threads {
        0 => num_cpus::get(),
        n => n as usize,
    };

    let verifier_threads = match SETTINGS.node.verifier_threads {
        0 => num_cpus::get(),
        n => n as usize,
    };

    // Also set rayon thread count according to verifier_threads value
    rayon::ThreadPoolBuilder::new()
        .num_threads(verifier_threads)
        .build_global()?;

    let runtime = Builder::new_multi_thread()
        .max_blocking_threads(verifier_threads)
        .worker_threads(worker_threads)
        .enable_io()
        .enable_time()
        .build()?;

    let chain_config = SETTINGS.chain_config().map_err(|err| anyhow!(err))?;

    if SETTINGS.node.memory_only {
        runtime.block_on(run_with_backend(chain_config, MemoryBackend::new()))
    } else {
        open_disk_backend(&runtime, chain_config)
    }
}

#[cfg(feature = "disk")]
fn open_disk_backend(runtime: &tokio::runtime::Runtime, chain_config: ChainConfig) -> anyhow::Result<()> {
    let mut path = std::path::PathBuf::from(&SETTINGS.node.data_dir);
    path.push(chain_config.network_name());
    info!("Opening chain database at {}", path.display());

    let backend = create_rocksdb_backend(&path).map_err(|err| anyhow!("could not open database: {}", err))?;
    runtime.block_on(run_with_backend(chain_config, backend))
}

#[cfg(not(feature = "disk"))]
fn open_disk_backend(runtime: &tokio::runtime::Runtime, chain_config: ChainConfig) -> anyhow::Result<()> {
    warn!("Built without disk support, running in memory only mode");
    runtime.block_on(run_with_backend(chain_config, MemoryBackend::new()))
}

async fn run_with_backend<B: ChainBackend>(chain_config: ChainConfig, backend: B) -> anyhow::Result<()> {
    let network_name = chain_config.network_name();
    let chain = Chain::new(chain_config.clone(), backend, SETTINGS.chain_options())
        .map_err(|err| anyhow!("could not load chain: {}", err))?;
    let chain = Arc::new(chain);

    if SETTINGS.node.memory_only {
        info!(
            "Running Lunacoin Core v{} on {} in memory only mode",
            env!("CARGO_PKG_VERSION"),
            network_name
        );
    } else {
        info!("Running Lunacoin Core v{} on {}", env!("CARGO_PKG_VERSION"), network_name);
    }

    let options = NodeOptions {
        listen_addr: SETTINGS.p2p_listen_addr(&chain_config),
        seeds: SETTINGS.seed_addrs(&chain_config),
        max_peers: SETTINGS.network.max_peers as usize,
        ..NodeOptions::default()
    };
    let (node, events) = Node::new(chain, options);

    spawn_miner(&node);

    #[cfg(feature = "rpc")]
    let run_rpc = {
        let node = node.clone();
        let port = SETTINGS.rpc_port(&chain_config);

        async move {
            if !SETTINGS.network.rpc_enabled {
                return;
            }

            // Create transports
            let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
            let server = server::BaseChannel::with_defaults(server_transport);
            let client = RpcServerDefinitionClient::new(tarpc::client::Config::default(), client_transport).spawn();

            // Schedule rpc server
            tokio::spawn(server.execute(RpcServer { node }.serve()));

            let credentials = RpcCredentials {
                username: SETTINGS.network.rpc_username.clone(),
                password: SETTINGS.network.rpc_password.clone(),
            };

            info!("Lunacoin Core v{} RPC Listening on port {}", env!("CARGO_PKG_VERSION"), port);
            warp::serve(rpc_route(client, credentials))
                .run(([127, 0, 0, 1], port))
                .await;
        }
    };

    #[cfg(not(feature = "rpc"))]
    let run_rpc = async {};

    tokio::spawn(run_rpc);

    tokio::select!(
        _ = check_exit_signal() => (),
        _ = node.run(events) => (),
    );

    Ok(())
}

#[cfg(feature = "miner")]
fn spawn_miner<B: ChainBackend>(node: &Node<B>) {
    if !SETTINGS.miner.enabled {
        return;
    }

    if let Some(coinbase) = SETTINGS.coinbase_address() {
        let threads = match SETTINGS.miner.miner_threads {
            0 => num_cpus::get(),
            n => n as usize,
        };
        let miner = lunacoin::miner::Miner::new(threads);
        tokio::spawn(node.clone().run_miner(miner, coinbase));
    }
}

#[cfg(not(feature = "miner"))]
fn spawn_miner<B: ChainBackend>(_node: &Node<B>) {
    if SETTINGS.miner.enabled {
        warn!("Built without miner support, ignoring miner settings");
    }
}

async fn check_exit_signal() {
    while !EXIT_SIGNAL.load(Ordering::Relaxed) {
        sleep(Duration::from_millis(10)).await;
    }

    info!("Lunacoin Core v{} shutting down...", env!("CARGO_PKG_VERSION"))
}

/// Installs a tracing subscriber filtered by `RUST_LOG`. Records emitted
/// through the `log` facade are forwarded to it.
fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
