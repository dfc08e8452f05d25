// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Peer to peer node.
//!
//! Each connection runs in its own task and forwards inbound messages to a
//! single dispatcher over a bounded channel. The dispatcher hands consensus
//! work to the blocking pool one item at a time, relays what was accepted to
//! every peer except the one it came from, and answers data requests.

use crate::chain::{BlockOutcome, Chain, ChainBackend, ChainErr, Processed, MAX_BLOCKS_PER_INV};
use crate::global::{exit_requested, request_exit, unix_now};
use crate::miner::{Miner, MinerResult};
use crate::primitives::{Address, Block, BlockVerifyErr, Hash256, Transaction};
use log::*;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{sleep, timeout};
use triomphe::Arc;

pub mod mempool;
pub mod peer;
pub mod peer_info;
pub mod rpc;
pub mod wire;

pub use mempool::*;
pub use peer_info::*;
pub use rpc::*;
pub use wire::*;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Silence after which we ping a peer
pub const PING_INTERVAL: Duration = Duration::from_secs(60);

/// Silence after which a peer is dropped
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

pub const DEFAULT_MAX_PEERS: usize = 32;
pub const EVENT_QUEUE_SIZE: usize = 1_024;
pub const PEER_QUEUE_SIZE: usize = 256;
pub const SEEN_CACHE_SIZE: usize = 100_000;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);
const TEMPLATE_REFRESH: Duration = Duration::from_secs(30);
const MINER_POLL: Duration = Duration::from_millis(25);

/// Max orphan roots we remember having asked for
const MAX_PENDING_ROOTS: usize = 1_024;

#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub listen_addr: Option<SocketAddr>,
    pub seeds: Vec<SocketAddr>,
    pub max_peers: usize,
    pub user_agent: String,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            listen_addr: None,
            seeds: vec![],
            max_peers: DEFAULT_MAX_PEERS,
            user_agent: format!("/lunacoin:{}/", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub enum NodeEvent {
    Connected(PeerId),
    Disconnected(PeerId),
    Message(PeerId, Message),

    /// Transaction submitted through the RPC interface
    SubmitTransaction(Transaction, oneshot::Sender<Result<Hash256, MempoolErr>>),

    /// Block found by the local miner
    MinedBlock(Block, oneshot::Sender<Result<BlockOutcome, ChainErr>>),
}

struct NodeInner<B: ChainBackend> {
    chain: Arc<Chain<B>>,
    peers: RwLock<PeerTable>,
    seen: Mutex<LruCache<Hash256, ()>>,
    codec: FrameCodec,
    nonce: u64,
    options: NodeOptions,
    events: mpsc::Sender<NodeEvent>,
    network_active: AtomicBool,
}

/// Shared handle to the node
pub struct Node<B: ChainBackend> {
    inner: Arc<NodeInner<B>>,
}

impl<B: ChainBackend> Clone for Node<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Dispatcher bookkeeping for block download
#[derive(Default)]
struct SyncState {
    /// Last block hash announced by each peer in response to `getblocks`
    last_inv_block: HashMap<PeerId, Hash256>,

    /// Orphan roots already requested
    pending_roots: HashSet<Hash256>,
}

impl<B: ChainBackend> Node<B> {
    pub fn new(chain: Arc<Chain<B>>, options: NodeOptions) -> (Self, mpsc::Receiver<NodeEvent>) {
        let (events, receiver) = mpsc::channel(EVENT_QUEUE_SIZE);
        let magic = chain.config().magic;
        let seen = LruCache::new(NonZeroUsize::new(SEEN_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN));

        let node = Self {
            inner: Arc::new(NodeInner {
                chain,
                peers: RwLock::new(PeerTable::new()),
                seen: Mutex::new(seen),
                codec: FrameCodec::new(magic),
                nonce: rand::random(),
                options,
                events,
                network_active: AtomicBool::new(true),
            }),
        };

        (node, receiver)
    }

    pub fn chain(&self) -> &Arc<Chain<B>> {
        &self.inner.chain
    }

    pub fn codec(&self) -> FrameCodec {
        self.inner.codec
    }

    pub fn version_msg(&self) -> VersionMsg {
        VersionMsg {
            version: PROTOCOL_VERSION,
            best_height: self.inner.chain.height(),
            nonce: self.inner.nonce,
            timestamp: unix_now(),
            listen_port: self.inner.options.listen_addr.map_or(0, |a| a.port()),
            user_agent: self.inner.options.user_agent.clone(),
        }
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.inner.peers.read().peers()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.peers.read().len()
    }

    pub fn banned(&self) -> Vec<(IpAddr, i64)> {
        self.inner.peers.read().banned(unix_now())
    }

    pub fn network_active(&self) -> bool {
        self.inner.network_active.load(Ordering::Relaxed)
    }

    /// Disconnects every peer when turned off and refuses new connections
    pub fn set_network_active(&self, active: bool) {
        self.inner.network_active.store(active, Ordering::Relaxed);

        if !active {
            let mut peers = self.inner.peers.write();
            for info in peers.peers() {
                peers.remove(info.id);
            }
        }
    }

    pub(crate) fn register_peer(
        &self,
        info: impl FnOnce(PeerId) -> PeerInfo,
        sender: mpsc::Sender<Message>,
        kill: Arc<Notify>,
    ) -> PeerId {
        let mut peers = self.inner.peers.write();
        let id = peers.next_id();
        let info = info(id);

        if !info.inbound {
            peers.add_known_addrs([info.addr]);
        }

        peers.insert(info, sender, kill);
        id
    }

    pub(crate) fn remove_peer(&self, id: PeerId) {
        self.inner.peers.write().remove(id);
    }

    /// Adds to a peer's misbehaviour score, dropping it at the threshold.
    /// Returns true if the peer was banned.
    pub(crate) fn punish(&self, id: PeerId, score: u32) -> bool {
        let mut peers = self.inner.peers.write();

        if !peers.misbehaving(id, score, unix_now()) {
            return false;
        }

        if let Some(info) = peers.remove(id) {
            warn!("Banned peer {} with score {}", info.addr, info.ban_score);
        }

        true
    }

    /// Forwards an event to the dispatcher. Returns false if it is gone.
    pub(crate) async fn notify(&self, event: NodeEvent) -> bool {
        self.inner.events.send(event).await.is_ok()
    }

    /// Returns true the first time a hash is seen
    fn mark_seen(&self, hash: Hash256) -> bool {
        self.inner.seen.lock().put(hash, ()).is_none()
    }

    fn is_seen(&self, hash: &Hash256) -> bool {
        self.inner.seen.lock().contains(hash)
    }

    fn send_to(&self, id: PeerId, msg: Message) {
        let sender = self.inner.peers.read().sender(id);

        if let Some(sender) = sender {
            if sender.try_send(msg).is_err() {
                debug!("Outbound queue of peer {} full, dropping message", id);
            }
        }
    }

    /// Sends to every peer except `origin`
    fn broadcast(&self, msg: Message, origin: Option<PeerId>) {
        let targets = self.inner.peers.read().relay_targets(origin);

        for (id, sender) in targets {
            if sender.try_send(msg.clone()).is_err() {
                debug!("Outbound queue of peer {} full, dropping relay", id);
            }
        }
    }

    /// Connects to `addr` and runs the connection in the background
    pub async fn connect(&self, addr: SocketAddr) -> bool {
        if !self.network_active() || self.inner.peers.read().is_banned(&addr.ip(), unix_now()) {
            return false;
        }

        match timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                tokio::spawn(peer::run_peer(self.clone(), stream, addr, false));
                true
            }
            Ok(Err(err)) => {
                debug!("Could not connect to {}: {}", addr, err);
                false
            }
            Err(_) => {
                debug!("Connection to {} timed out", addr);
                false
            }
        }
    }

    async fn listen(self, addr: SocketAddr) {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("Could not listen on {}: {}", addr, err);
                return;
            }
        };

        info!("Listening for peers on {}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let refuse = {
                        let peers = self.inner.peers.read();
                        !self.network_active()
                            || peers.is_banned(&remote.ip(), unix_now())
                            || peers.len() >= self.inner.options.max_peers
                    };

                    if refuse {
                        debug!("Refusing connection from {}", remote);
                        continue;
                    }

                    tokio::spawn(peer::run_peer(self.clone(), stream, remote, true));
                }
                Err(err) => warn!("Accept failed: {}", err),
            }
        }
    }

    /// Runs the listener, seed connections, periodic upkeep and the dispatcher
    /// until an exit is requested.
    pub async fn run(self, mut events: mpsc::Receiver<NodeEvent>) {
        if let Some(addr) = self.inner.options.listen_addr {
            tokio::spawn(self.clone().listen(addr));
        }

        for seed in self.inner.options.seeds.clone() {
            let node = self.clone();
            tokio::spawn(async move {
                node.connect(seed).await;
            });
        }

        tokio::spawn(self.clone().maintenance());

        let mut sync = SyncState::default();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(&mut sync, event).await,
                    None => break,
                },

                _ = sleep(Duration::from_millis(200)) => {
                    if exit_requested() {
                        break;
                    }
                }
            }
        }
    }

    async fn maintenance(self) {
        loop {
            sleep(MAINTENANCE_INTERVAL).await;
            let now = unix_now();
            let chain = self.inner.chain.clone();

            if let Err(err) = tokio::task::spawn_blocking(move || chain.expire_mempool(now)).await {
                error!("Mempool expiry task failed: {}", err);
            }

            let candidates = {
                let mut peers = self.inner.peers.write();
                peers.prune_bans(now);
                let want = (self.inner.options.max_peers / 2).saturating_sub(peers.len());
                peers.dial_candidates(want, now)
            };

            for addr in candidates {
                self.connect(addr).await;
            }

            // Catch up with any peer that announced a better chain
            let height = self.inner.chain.height();
            let best = self.inner.peers.read().best_peer_above(height);
            if let Some(id) = best {
                self.send_to(id, Message::GetBlocks(self.inner.chain.locator()));
            }
        }
    }

    async fn handle_event(&self, sync: &mut SyncState, event: NodeEvent) {
        match event {
            NodeEvent::Connected(id) => {
                let (higher, inbound) = match self.inner.peers.read().get(id) {
                    Some(info) => (info.best_height > self.inner.chain.height(), info.inbound),
                    None => return,
                };

                if higher {
                    self.send_to(id, Message::GetBlocks(self.inner.chain.locator()));
                }

                if !inbound {
                    self.send_to(id, Message::GetAddr);
                }
            }

            NodeEvent::Disconnected(id) => {
                sync.last_inv_block.remove(&id);
            }

            NodeEvent::Message(id, msg) => self.handle_message(sync, id, msg).await,

            NodeEvent::SubmitTransaction(tx, reply) => {
                let result = self.accept_transaction(tx, None).await;
                let _ = reply.send(result);
            }

            NodeEvent::MinedBlock(block, reply) => {
                let result = if block.header.prev_hash != self.inner.chain.best_block_hash() {
                    debug!("Discarding mined block that does not extend the tip");
                    Err(ChainErr::Block(BlockVerifyErr::InvalidPrevHash))
                } else {
                    self.accept_block(sync, block, None).await.map(|p| p.outcome)
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn handle_message(&self, sync: &mut SyncState, id: PeerId, msg: Message) {
        let chain = &self.inner.chain;

        match msg {
            Message::Inv(items) => {
                let mut wanted = Vec::new();

                for item in items {
                    if self.is_seen(&item.hash) {
                        continue;
                    }

                    let known = match item.kind {
                        InvKind::Block => chain.knows_block(&item.hash),
                        InvKind::Tx => chain.mempool_contains(&item.hash),
                    };

                    if !known {
                        if item.kind == InvKind::Block {
                            sync.last_inv_block.insert(id, item.hash);
                        }
                        wanted.push(item);
                    }
                }

                if !wanted.is_empty() {
                    self.send_to(id, Message::GetData(wanted));
                }
            }

            Message::GetData(items) => {
                for item in items {
                    match item.kind {
                        InvKind::Block => match chain.get_block(&item.hash) {
                            Ok(Some(block)) => self.send_to(id, Message::Block(Box::new(block))),
                            Ok(None) => {}
                            Err(err) => error!("Could not read block {}: {}", item.hash, err),
                        },
                        InvKind::Tx => {
                            if let Some(tx) = chain.mempool_tx(&item.hash) {
                                self.send_to(id, Message::Tx(Box::new(tx)));
                            }
                        }
                    }
                }
            }

            Message::Block(block) => {
                let height = block.header.height;

                if let Ok(processed) = self.accept_block(sync, *block, Some(id)).await {
                    self.inner.peers.write().update_height(id, height);

                    // Ask for the next batch once the last announced block arrives
                    if sync.last_inv_block.get(&id) == Some(&processed.hash) {
                        sync.last_inv_block.remove(&id);
                        let behind = self
                            .inner
                            .peers
                            .read()
                            .get(id)
                            .map_or(false, |p| p.best_height > chain.height());

                        if behind {
                            self.send_to(id, Message::GetBlocks(chain.locator()));
                        }
                    }
                }
            }

            Message::Tx(tx) => {
                if let Err(err) = self.accept_transaction(*tx, Some(id)).await {
                    debug!("Dropped transaction from peer {}: {}", id, err);
                }
            }

            Message::GetBlocks(locator) => {
                let hashes = chain.hashes_after_locator(&locator, MAX_BLOCKS_PER_INV);

                if !hashes.is_empty() {
                    self.send_to(id, Message::Inv(hashes.into_iter().map(InvItem::block).collect()));
                }
            }

            Message::GetAddr => {
                let addrs = self.inner.peers.read().known_addrs(MAX_ADDRS);
                self.send_to(id, Message::Addr(addrs));
            }

            Message::Addr(addrs) => {
                self.inner.peers.write().add_known_addrs(addrs);
            }

            // Handled by the connection task
            Message::Version(_) | Message::Verack | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    /// Validates and stores a block, relaying it if the tip moved
    async fn accept_block(
        &self,
        sync: &mut SyncState,
        block: Block,
        origin: Option<PeerId>,
    ) -> Result<Processed, ChainErr> {
        let chain = self.inner.chain.clone();
        let now = unix_now();
        let result = tokio::task::spawn_blocking(move || chain.process_block(block, now))
            .await
            .unwrap_or(Err(ChainErr::Fatal("block validation task failed")));

        let processed = match result {
            Ok(processed) => processed,
            Err(err) => {
                if err.is_fatal() {
                    error!("Fatal chain error: {}", err);
                    request_exit();
                } else if let Some(id) = origin {
                    debug!("Rejected block from peer {}: {}", id, err);
                    if err.ban_score() > 0 {
                        self.punish(id, err.ban_score());
                    }
                }

                return Err(err);
            }
        };

        self.mark_seen(processed.hash);

        if processed.outcome.is_new_tip() {
            self.broadcast(Message::Inv(vec![InvItem::block(processed.hash)]), origin);
        }

        for (hash, outcome) in &processed.adopted {
            self.mark_seen(*hash);
            if outcome.is_new_tip() {
                self.broadcast(Message::Inv(vec![InvItem::block(*hash)]), origin);
            }
        }

        if let (BlockOutcome::Orphan { missing }, Some(id)) = (&processed.outcome, origin) {
            if sync.pending_roots.len() >= MAX_PENDING_ROOTS {
                sync.pending_roots.clear();
            }

            if sync.pending_roots.insert(*missing) {
                self.send_to(id, Message::GetBlocks(self.inner.chain.locator()));
            }
        }

        if processed.outcome.is_new_tip() {
            sync.pending_roots.clear();
        }

        Ok(processed)
    }

    /// Admits a transaction to the mempool and relays it
    async fn accept_transaction(&self, tx: Transaction, origin: Option<PeerId>) -> Result<Hash256, MempoolErr> {
        let hash = tx.hash();

        if !self.mark_seen(hash) && origin.is_some() {
            return Err(MempoolErr::AlreadyKnown);
        }

        let chain = self.inner.chain.clone();
        let now = unix_now();
        let result = tokio::task::spawn_blocking(move || chain.submit_transaction(tx, now))
            .await
            .unwrap_or(Err(MempoolErr::Full));

        if result.is_ok() {
            self.broadcast(Message::Inv(vec![InvItem::tx(hash)]), origin);
        }

        result
    }

    /// Queues a transaction behind network traffic and waits for the verdict
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, MempoolErr> {
        let (reply, verdict) = oneshot::channel();

        if !self.notify(NodeEvent::SubmitTransaction(tx, reply)).await {
            return Err(MempoolErr::Full);
        }

        verdict.await.unwrap_or(Err(MempoolErr::Full))
    }

    /// Submits a locally mined block. Blocks that no longer extend the tip
    /// are discarded without being broadcast.
    pub async fn submit_block(&self, block: Block) -> Result<BlockOutcome, ChainErr> {
        let (reply, verdict) = oneshot::channel();

        if !self.notify(NodeEvent::MinedBlock(block, reply)).await {
            return Err(ChainErr::Fatal("dispatcher stopped"));
        }

        verdict
            .await
            .unwrap_or(Err(ChainErr::Fatal("dispatcher stopped")))
    }

    /// Keeps the miner busy on a template for the current tip, restarting it
    /// whenever the tip changes or the template grows stale.
    pub async fn run_miner(self, miner: Miner, coinbase: Address) {
        let mut tip = self.inner.chain.subscribe();
        let mut generation = 0;
        let mut restart = true;
        let mut last_template = tokio::time::Instant::now();

        info!("Mining to {} on {} threads", coinbase, miner.num_threads());

        loop {
            if exit_requested() {
                miner.pause();
                return;
            }

            if restart || last_template.elapsed() >= TEMPLATE_REFRESH {
                generation += 1;
                let chain = self.inner.chain.clone();
                let now = unix_now();
                match tokio::task::spawn_blocking(move || chain.block_template(coinbase, now)).await {
                    Ok(template) => {
                        debug!(
                            "Mining template {} at height {} with {} transactions",
                            generation,
                            template.header.height,
                            template.txs.len()
                        );
                        miner.start(generation, template);
                    }
                    Err(err) => {
                        error!("Template task failed: {}", err);
                        return;
                    }
                }
                restart = false;
                last_template = tokio::time::Instant::now();
            }

            tokio::select! {
                changed = tip.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    restart = true;
                }

                _ = sleep(MINER_POLL) => {
                    while let Some(result) = miner.try_recv_result() {
                        match result {
                            MinerResult::Found { generation: g, block } if g == generation => {
                                miner.pause();
                                let hash = block.hash();
                                match self.submit_block(block).await {
                                    Ok(outcome) => info!("Mined block {} ({:?})", hash, outcome),
                                    Err(err) => debug!("Mined block {} not accepted: {}", hash, err),
                                }
                                restart = true;
                            }

                            MinerResult::Exhausted { generation: g } if g == generation => {
                                restart = true;
                            }

                            _ => debug!("Discarding stale miner result"),
                        }
                    }
                }
            }
        }
    }
}
