// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::{ChainBackend, TxStatus};
use crate::consensus::Money;
use crate::global::{request_exit, uptime};
use crate::node::{MempoolInfo, Node, PeerInfo};
use crate::primitives::{Address, Block, Hash256, SerialPair, Ticket, TicketStatus, Transaction};
use futures::{
    future::{self, BoxFuture, Ready},
    prelude::*,
};
use log::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tarpc::context;
use warp::Filter;

pub type RpcRequest = tarpc::ClientMessage<RpcServerDefinitionRequest>;
pub type RpcResponse = tarpc::Response<RpcServerDefinitionResponse>;
pub type RpcChannel = tarpc::transport::channel::UnboundedChannel<RpcResponse, RpcRequest>;

/// Max accepted HTTP body size
pub const MAX_RPC_BODY: u64 = 1024 * 2048;

const BASIC_AUTH_HASH_KEY: &str = "lunacoin.basic_auth";

#[tarpc::service]
pub trait RpcServerDefinition {
    /// Submits a hex encoded signed transaction to the mempool
    async fn submit_transaction(tx_hex: String) -> SubmitTxResult;

    /// Spendable balance of the given address at the tip
    async fn get_balance(address: String) -> Result<Money, RpcErr>;

    /// Ticket registered under the given serial pair
    async fn get_ticket(primary: String, secondary: String) -> Result<Option<TicketView>, RpcErr>;

    /// Returns the height of the best chain
    async fn get_chain_height() -> u64;

    /// Returns information about each peer
    async fn get_peers() -> Vec<PeerInfo>;

    async fn get_best_block_hash() -> String;

    /// Returns the block with the given hash
    async fn get_block(hash: String) -> Result<BlockView, RpcErr>;

    /// Returns the hash of block in best-block-chain at height provided
    async fn get_block_hash(height: u64) -> Result<String, RpcErr>;

    /// Returns info about the mempool
    async fn get_mempool_info() -> MempoolInfo;

    /// Hashes of all pooled transactions, highest fee rate first
    async fn get_raw_mempool() -> Vec<String>;

    /// Confirmation status of the transaction with the given hash
    async fn get_transaction(txid: String) -> Result<TxView, RpcErr>;

    /// Returns information about the Blockchain
    async fn get_blockchain_info() -> BlockchainInfo;

    /// Returns the total p2p connections count
    async fn get_connection_count() -> u64;

    /// Connects to the node at the given socket address
    async fn add_node(node: String) -> Result<bool, RpcErr>;

    /// Lists banned ips
    async fn list_banned() -> Vec<BannedEntry>;

    /// Enables/Disables all p2p network activity
    async fn set_network_active(active: bool) -> bool;

    /// Attempts to gracefully shutdown Lunacoin
    async fn stop() -> String;

    /// Returns the number of seconds the server has been running
    async fn uptime() -> u64;

    /// Validates the given address
    async fn validate_address(address: String) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcErr {
    InvalidAddress,
    InvalidHash,
    InvalidSerials,
    InvalidSocketAddr,
    BlockNotFound,
    Internal(String),
}

impl fmt::Display for RpcErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddress => f.write_str("invalid address"),
            Self::InvalidHash => f.write_str("invalid hash"),
            Self::InvalidSerials => f.write_str("invalid serial pair"),
            Self::InvalidSocketAddr => f.write_str("invalid socket address"),
            Self::BlockNotFound => f.write_str("block not found"),
            Self::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTxResult {
    pub accepted: bool,
    pub txid: Option<String>,

    /// Rejection reason
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketView {
    pub primary: String,
    pub secondary: String,
    pub status: TicketStatus,
    pub owner: Address,
    pub locked_value: Money,
    pub artifact_hash: String,

    /// Hex encoded identity profile, present once linked
    pub profile: Option<String>,
    pub commit_tx: String,
    pub commit_height: u64,
}

impl From<Ticket> for TicketView {
    fn from(ticket: Ticket) -> Self {
        Self {
            primary: ticket.serials.primary,
            secondary: ticket.serials.secondary,
            status: ticket.status,
            owner: ticket.owner,
            locked_value: ticket.locked_value,
            artifact_hash: ticket.artifact_hash.to_hex(),
            profile: ticket.profile.map(hex::encode),
            commit_tx: ticket.commit_tx.to_hex(),
            commit_height: ticket.commit_height,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockView {
    pub hash: String,
    pub height: u64,
    pub prev_hash: String,
    pub timestamp: i64,
    pub bits: u32,
    pub nonce: u64,
    pub size: usize,
    pub txids: Vec<String>,

    /// Zero for blocks off the main chain
    pub confirmations: u64,

    /// Hex encoded canonical block bytes
    pub hex: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Confirmed,
    Pending,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxView {
    pub txid: String,
    pub state: TxState,
    pub block_hash: Option<String>,
    pub height: Option<u64>,
    pub confirmations: u64,
    pub fee: Option<Money>,

    /// Hex encoded canonical transaction bytes
    pub hex: Option<String>,
}

impl TxView {
    fn new(txid: Hash256, status: TxStatus) -> Self {
        let mut view = Self {
            txid: txid.to_hex(),
            state: TxState::Unknown,
            block_hash: None,
            height: None,
            confirmations: 0,
            fee: None,
            hex: None,
        };

        match status {
            TxStatus::Confirmed {
                tx,
                block_hash,
                height,
                confirmations,
            } => {
                view.state = TxState::Confirmed;
                view.block_hash = Some(block_hash.to_hex());
                view.height = Some(height);
                view.confirmations = confirmations;
                view.fee = Some(tx.fee);
                view.hex = Some(hex::encode(tx.to_bytes()));
            }

            TxStatus::Pending(tx) => {
                view.state = TxState::Pending;
                view.fee = Some(tx.fee);
                view.hex = Some(hex::encode(tx.to_bytes()));
            }

            TxStatus::Unknown => {}
        }

        view
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub network: String,
    pub height: u64,
    pub best_block_hash: String,
    pub chain_work: String,
    pub bits: u32,
    pub issued: Money,
    pub tickets: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedEntry {
    pub ip: String,

    /// Unix timestamp at which the ban is lifted
    pub banned_until: i64,
}

/// RPC server
pub struct RpcServer<B: ChainBackend> {
    pub node: Node<B>,
}

impl<B: ChainBackend> Clone for RpcServer<B> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<B: ChainBackend> RpcServer<B> {
    fn block_view(&self, hash: Hash256, block: Block) -> BlockView {
        let confirmations = self.node.chain().confirmations(&hash);

        BlockView {
            hash: hash.to_hex(),
            height: block.header.height,
            prev_hash: block.header.prev_hash.to_hex(),
            timestamp: block.header.timestamp,
            bits: block.header.bits,
            nonce: block.header.nonce,
            size: block.size(),
            txids: block.txs.iter().map(|tx| tx.hash().to_hex()).collect(),
            confirmations,
            hex: hex::encode(block.to_bytes()),
        }
    }
}

impl<B: ChainBackend> RpcServerDefinition for RpcServer<B> {
    type SubmitTransactionFut = BoxFuture<'static, SubmitTxResult>;
    type GetBalanceFut = Ready<Result<Money, RpcErr>>;
    type GetTicketFut = Ready<Result<Option<TicketView>, RpcErr>>;
    type GetChainHeightFut = Ready<u64>;
    type GetPeersFut = Ready<Vec<PeerInfo>>;
    type GetBestBlockHashFut = Ready<String>;
    type GetBlockFut = Ready<Result<BlockView, RpcErr>>;
    type GetBlockHashFut = Ready<Result<String, RpcErr>>;
    type GetMempoolInfoFut = Ready<MempoolInfo>;
    type GetRawMempoolFut = Ready<Vec<String>>;
    type GetTransactionFut = Ready<Result<TxView, RpcErr>>;
    type GetBlockchainInfoFut = Ready<BlockchainInfo>;
    type GetConnectionCountFut = Ready<u64>;
    type AddNodeFut = BoxFuture<'static, Result<bool, RpcErr>>;
    type ListBannedFut = Ready<Vec<BannedEntry>>;
    type SetNetworkActiveFut = Ready<bool>;
    type StopFut = Ready<String>;
    type UptimeFut = Ready<u64>;
    type ValidateAddressFut = Ready<bool>;

    fn submit_transaction(self, _: context::Context, tx_hex: String) -> Self::SubmitTransactionFut {
        async move {
            let rejected = |reason: String| SubmitTxResult {
                accepted: false,
                txid: None,
                reason: Some(reason),
            };

            let bytes = match hex::decode(tx_hex.trim()) {
                Ok(bytes) => bytes,
                Err(_) => return rejected("invalid hex".to_owned()),
            };

            let tx: Transaction = match crate::codec::decode(&bytes) {
                Ok(tx) => tx,
                Err(err) => return rejected(format!("malformed transaction: {err}")),
            };

            match self.node.submit_transaction(tx).await {
                Ok(txid) => SubmitTxResult {
                    accepted: true,
                    txid: Some(txid.to_hex()),
                    reason: None,
                },
                Err(err) => rejected(err.to_string()),
            }
        }
        .boxed()
    }

    fn get_balance(self, _: context::Context, address: String) -> Self::GetBalanceFut {
        let result = Address::from_bech32(&address)
            .map(|address| self.node.chain().balance_of(&address))
            .map_err(|_| RpcErr::InvalidAddress);

        future::ready(result)
    }

    fn get_ticket(self, _: context::Context, primary: String, secondary: String) -> Self::GetTicketFut {
        let serials = SerialPair::new(&primary, &secondary);

        if !serials.is_well_formed() {
            return future::ready(Err(RpcErr::InvalidSerials));
        }

        future::ready(Ok(self.node.chain().ticket(&serials).map(TicketView::from)))
    }

    fn get_chain_height(self, _: context::Context) -> Self::GetChainHeightFut {
        future::ready(self.node.chain().height())
    }

    fn get_peers(self, _: context::Context) -> Self::GetPeersFut {
        future::ready(self.node.peers())
    }

    fn get_best_block_hash(self, _: context::Context) -> Self::GetBestBlockHashFut {
        future::ready(self.node.chain().best_block_hash().to_hex())
    }

    fn get_block(self, _: context::Context, hash: String) -> Self::GetBlockFut {
        let hash = match Hash256::from_hex(&hash) {
            Ok(hash) => hash,
            Err(_) => return future::ready(Err(RpcErr::InvalidHash)),
        };

        let result = match self.node.chain().get_block(&hash) {
            Ok(Some(block)) => Ok(self.block_view(hash, block)),
            Ok(None) => Err(RpcErr::BlockNotFound),
            Err(err) => Err(RpcErr::Internal(err.to_string())),
        };

        future::ready(result)
    }

    fn get_block_hash(self, _: context::Context, height: u64) -> Self::GetBlockHashFut {
        let result = self
            .node
            .chain()
            .main_hash_at(height)
            .map(|h| h.to_hex())
            .ok_or(RpcErr::BlockNotFound);

        future::ready(result)
    }

    fn get_mempool_info(self, _: context::Context) -> Self::GetMempoolInfoFut {
        future::ready(self.node.chain().mempool_info())
    }

    fn get_raw_mempool(self, _: context::Context) -> Self::GetRawMempoolFut {
        let hashes = self.node.chain().mempool_hashes();
        future::ready(hashes.iter().map(Hash256::to_hex).collect())
    }

    fn get_transaction(self, _: context::Context, txid: String) -> Self::GetTransactionFut {
        let txid = match Hash256::from_hex(&txid) {
            Ok(txid) => txid,
            Err(_) => return future::ready(Err(RpcErr::InvalidHash)),
        };

        let result = self
            .node
            .chain()
            .transaction_status(&txid)
            .map(|status| TxView::new(txid, status))
            .map_err(|err| RpcErr::Internal(err.to_string()));

        future::ready(result)
    }

    fn get_blockchain_info(self, _: context::Context) -> Self::GetBlockchainInfoFut {
        let chain = self.node.chain();
        let tip = chain.tip();

        future::ready(BlockchainInfo {
            network: chain.config().network_name().to_owned(),
            height: tip.height,
            best_block_hash: tip.hash.to_hex(),
            chain_work: tip.work.to_hex(),
            bits: tip.bits,
            issued: chain.issued(),
            tickets: chain.ticket_count(),
        })
    }

    fn get_connection_count(self, _: context::Context) -> Self::GetConnectionCountFut {
        future::ready(self.node.connection_count() as u64)
    }

    fn add_node(self, _: context::Context, node: String) -> Self::AddNodeFut {
        async move {
            let addr: SocketAddr = node.parse().map_err(|_| RpcErr::InvalidSocketAddr)?;
            Ok(self.node.connect(addr).await)
        }
        .boxed()
    }

    fn list_banned(self, _: context::Context) -> Self::ListBannedFut {
        let banned = self
            .node
            .banned()
            .into_iter()
            .map(|(ip, until)| BannedEntry {
                ip: ip.to_string(),
                banned_until: until,
            })
            .collect();

        future::ready(banned)
    }

    fn set_network_active(self, _: context::Context, active: bool) -> Self::SetNetworkActiveFut {
        self.node.set_network_active(active);
        future::ready(active)
    }

    fn stop(self, _: context::Context) -> Self::StopFut {
        info!("Shutdown requested over RPC");
        request_exit();
        future::ready("Lunacoin shutting down".to_owned())
    }

    fn uptime(self, _: context::Context) -> Self::UptimeFut {
        future::ready(uptime())
    }

    fn validate_address(self, _: context::Context, address: String) -> Self::ValidateAddressFut {
        future::ready(Address::from_bech32(&address).is_ok())
    }
}

/// Credentials required by the HTTP endpoint
#[derive(Clone)]
pub struct RpcCredentials {
    pub username: String,
    pub password: String,
}

pub async fn dispatch_rpc_request(
    request: tarpc::Request<RpcServerDefinitionRequest>,
    client: RpcServerDefinitionClient,
) -> Result<RpcServerDefinitionResponse, String> {
    client
        .0
        .call(context::current(), &request.id.to_string(), request.message)
        .await
        .map_err(|err| err.to_string())
}

pub async fn handle_rpc_request(
    request: tarpc::Request<RpcServerDefinitionRequest>,
    client: RpcServerDefinitionClient,
    credentials: RpcCredentials,
    authorization: String,
) -> Result<impl warp::Reply, warp::Rejection> {
    if !check_authorization_header(&authorization, &credentials.username, &credentials.password) {
        return Ok(warp::reply::with_status(
            warp::reply::json(&"Forbidden".to_owned()),
            warp::http::StatusCode::FORBIDDEN,
        ));
    }

    match dispatch_rpc_request(request, client).await {
        Ok(resp) => Ok(warp::reply::with_status(
            warp::reply::json(&resp),
            warp::http::StatusCode::OK,
        )),

        Err(err) => Ok(warp::reply::with_status(
            warp::reply::json(&err),
            warp::http::StatusCode::BAD_REQUEST,
        )),
    }
}

/// Checks a `Basic` authorization header. Both sides are hashed and compared
/// in constant time.
pub fn check_authorization_header(auth: &str, username: &str, password: &str) -> bool {
    let split: Vec<_> = auth.split(' ').collect();

    if split.len() != 2 || split[0] != "Basic" {
        return false;
    }

    let decoded = match base64::decode(split[1]) {
        Ok(decoded) => decoded,
        Err(_) => return false,
    };

    let oracle_key = format!("{username}:{password}");
    let oracle_hash = Hash256::hash_from_slice(oracle_key.as_bytes(), BASIC_AUTH_HASH_KEY);
    let hash = Hash256::hash_from_slice(decoded, BASIC_AUTH_HASH_KEY);

    constant_time_eq::constant_time_eq_32(&oracle_hash.0, &hash.0)
}

pub fn json_body(
) -> impl Filter<Extract = (tarpc::Request<RpcServerDefinitionRequest>,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(MAX_RPC_BODY).and(warp::body::json())
}

/// HTTP POST route forwarding authorized JSON requests to the service client
pub fn rpc_route(
    client: RpcServerDefinitionClient,
    credentials: RpcCredentials,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let client_filter = warp::any().map(move || client.clone());
    let credentials_filter = warp::any().map(move || credentials.clone());

    warp::post()
        .and(warp::path::end())
        .and(json_body())
        .and(client_filter)
        .and(credentials_filter)
        .and(warp::header("authorization"))
        .and_then(handle_rpc_request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, ChainConfig, ChainOptions, MemoryBackend};
    use crate::node::NodeOptions;
    use crate::test_util::*;
    use tarpc::server::{self, Channel};
    use triomphe::Arc;

    fn spawn_rpc() -> (RpcServerDefinitionClient, Node<MemoryBackend>) {
        let chain = Chain::new(ChainConfig::regtest(), MemoryBackend::new(), ChainOptions::default()).unwrap();
        let (node, events) = Node::new(Arc::new(chain), NodeOptions::default());
        tokio::spawn(node.clone().run(events));

        let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
        let server = server::BaseChannel::with_defaults(server_transport);
        tokio::spawn(server.execute(RpcServer { node: node.clone() }.serve()));
        let client = RpcServerDefinitionClient::new(tarpc::client::Config::default(), client_transport).spawn();

        (client, node)
    }

    #[test]
    fn it_checks_basic_auth() {
        let header = format!("Basic {}", base64::encode("luna:secret"));
        assert!(check_authorization_header(&header, "luna", "secret"));
        assert!(!check_authorization_header(&header, "luna", "other"));
        assert!(!check_authorization_header("Bearer abc", "luna", "secret"));
        assert!(!check_authorization_header("Basic !!!", "luna", "secret"));
        assert!(!check_authorization_header("Basic", "luna", "secret"));
    }

    #[test]
    fn submit_result_json_shape() {
        let res = SubmitTxResult {
            accepted: false,
            txid: None,
            reason: Some("mempool full".to_owned()),
        };
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["accepted"], serde_json::Value::Bool(false));
        assert!(json["txid"].is_null());
        assert_eq!(json["reason"], "mempool full");

        let err: RpcErr = serde_json::from_str("\"BlockNotFound\"").unwrap();
        assert_eq!(err, RpcErr::BlockNotFound);
    }

    #[tokio::test]
    async fn it_answers_chain_queries() {
        let (client, node) = spawn_rpc();
        let genesis = node.chain().best_block_hash();

        assert_eq!(client.get_chain_height(context::current()).await.unwrap(), 0);
        assert_eq!(client.get_best_block_hash(context::current()).await.unwrap(), genesis.to_hex());
        assert_eq!(
            client.get_block_hash(context::current(), 0).await.unwrap(),
            Ok(genesis.to_hex())
        );
        assert_eq!(
            client.get_block_hash(context::current(), 1).await.unwrap(),
            Err(RpcErr::BlockNotFound)
        );

        let block = client.get_block(context::current(), genesis.to_hex()).await.unwrap().unwrap();
        assert_eq!(block.height, 0);
        assert_eq!(block.confirmations, 1);
        assert_eq!(block.txids.len(), 1);

        assert_eq!(
            client.get_block(context::current(), "zz".to_owned()).await.unwrap(),
            Err(RpcErr::InvalidHash)
        );

        let info = client.get_blockchain_info(context::current()).await.unwrap();
        assert_eq!(info.network, "regtest");
        assert_eq!(info.tickets, 0);
    }

    #[tokio::test]
    async fn it_reports_balances_and_tickets() {
        let (client, node) = spawn_rpc();
        let key = test_key(4);
        let genesis = Block::genesis(&ChainConfig::regtest());
        let b1 = mine_empty_child(&genesis, &key, 0);
        node.chain().process_block(b1, crate::global::unix_now()).unwrap();

        let balance = client
            .get_balance(context::current(), address_of(&key).to_bech32())
            .await
            .unwrap();
        assert_eq!(balance, Ok(crate::consensus::map_height_to_block_reward(1)));

        assert_eq!(
            client.get_balance(context::current(), "nope".to_owned()).await.unwrap(),
            Err(RpcErr::InvalidAddress)
        );
        assert_eq!(
            client
                .get_ticket(context::current(), "A1".to_owned(), "B1".to_owned())
                .await
                .unwrap(),
            Ok(None)
        );
        assert_eq!(
            client
                .get_ticket(context::current(), String::new(), "B1".to_owned())
                .await
                .unwrap(),
            Err(RpcErr::InvalidSerials)
        );
    }

    #[tokio::test]
    async fn it_reports_rejected_submissions() {
        let (client, _node) = spawn_rpc();

        let res = client
            .submit_transaction(context::current(), "not hex".to_owned())
            .await
            .unwrap();
        assert!(!res.accepted);
        assert_eq!(res.reason.as_deref(), Some("invalid hex"));

        let bogus = transfer(
            &test_key(1),
            vec![crate::primitives::OutPoint::new(Hash256::zero(), 0)],
            vec![pay(&test_key(2), 10)],
            1,
        );
        let res = client
            .submit_transaction(context::current(), hex::encode(bogus.to_bytes()))
            .await
            .unwrap();
        assert!(!res.accepted);
        assert!(res.txid.is_none());
        assert!(res.reason.is_some());
    }

    #[tokio::test]
    async fn it_tracks_transactions_from_pool_to_block() {
        let (client, node) = spawn_rpc();
        let chain = node.chain();
        let now = crate::global::unix_now();
        let alice = test_key(4);
        let genesis = Block::genesis(&ChainConfig::regtest());
        let b1 = mine_empty_child(&genesis, &alice, 0);
        chain.process_block(b1.clone(), now).unwrap();

        let reward = crate::consensus::map_height_to_block_reward(1);
        let tx = transfer(
            &alice,
            vec![crate::primitives::OutPoint::new(b1.txs[0].hash(), 0)],
            vec![pay(&test_key(5), reward - 500)],
            500,
        );
        let txid = chain.submit_transaction(tx, now).unwrap();

        assert_eq!(client.get_raw_mempool(context::current()).await.unwrap(), vec![txid.to_hex()]);
        let view = client.get_transaction(context::current(), txid.to_hex()).await.unwrap().unwrap();
        assert_eq!(view.state, TxState::Pending);
        assert_eq!(view.fee, Some(500));
        assert!(view.block_hash.is_none());

        let mut b2 = chain.block_template(address_of(&test_key(6)), now);
        while b2.header.validate_pow().is_err() {
            b2.header.increment_nonce().unwrap();
        }
        chain.process_block(b2.clone(), now).unwrap();
        assert!(client.get_raw_mempool(context::current()).await.unwrap().is_empty());

        let view = client.get_transaction(context::current(), txid.to_hex()).await.unwrap().unwrap();
        assert_eq!(view.state, TxState::Confirmed);
        assert_eq!(view.block_hash, Some(b2.hash().to_hex()));
        assert_eq!(view.height, Some(2));
        assert_eq!(view.confirmations, 1);

        let b3 = mine_empty_child(&b2, &alice, 0);
        chain.process_block(b3, now).unwrap();
        let view = client.get_transaction(context::current(), txid.to_hex()).await.unwrap().unwrap();
        assert_eq!(view.confirmations, 2);

        let unknown = client
            .get_transaction(context::current(), Hash256::zero().to_hex())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unknown.state, TxState::Unknown);
        assert!(unknown.hex.is_none());

        assert_eq!(
            client.get_transaction(context::current(), "xyz".to_owned()).await.unwrap(),
            Err(RpcErr::InvalidHash)
        );
    }

    #[tokio::test]
    async fn it_validates_addresses() {
        let (client, _node) = spawn_rpc();
        let address = address_of(&test_key(1)).to_bech32();

        assert!(client.validate_address(context::current(), address).await.unwrap());
        assert!(!client.validate_address(context::current(), "lnc1xyz".to_owned()).await.unwrap());
    }
}
