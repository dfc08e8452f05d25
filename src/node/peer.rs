// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! A single peer connection: handshake, then a read loop feeding the
//! dispatcher and a writer task draining the peer's outbound queue.

use crate::chain::ChainBackend;
use crate::global::unix_now;
use crate::node::*;
use bytes::BytesMut;
use log::*;
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::{timeout, Instant};
use triomphe::Arc;

/// Score for messages that are only valid during the handshake
const HANDSHAKE_REPLAY_SCORE: u32 = 20;

#[derive(Debug)]
pub enum PeerErr {
    Wire(WireErr),

    /// The remote end is this node
    SelfConnection,
    Incompatible(u32),
    Unexpected(&'static str),
    TimedOut,
}

impl fmt::Display for PeerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire(err) => write!(f, "{err}"),
            Self::SelfConnection => f.write_str("connected to self"),
            Self::Incompatible(v) => write!(f, "incompatible protocol version {v}"),
            Self::Unexpected(cmd) => write!(f, "unexpected {cmd} during handshake"),
            Self::TimedOut => f.write_str("handshake timed out"),
        }
    }
}

impl From<WireErr> for PeerErr {
    fn from(other: WireErr) -> Self {
        Self::Wire(other)
    }
}

/// Exchanges `version` and `verack` in both directions
pub(crate) async fn handshake<R, W>(
    codec: FrameCodec,
    ours: &VersionMsg,
    reader: &mut R,
    writer: &mut W,
    buf: &mut BytesMut,
) -> Result<VersionMsg, PeerErr>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    codec.write_message(writer, &Message::Version(ours.clone())).await?;

    let mut theirs = None;
    let mut got_verack = false;

    while theirs.is_none() || !got_verack {
        match codec.read_message(reader, buf).await? {
            Message::Version(v) if theirs.is_none() => {
                if v.nonce == ours.nonce {
                    return Err(PeerErr::SelfConnection);
                }

                if v.version != PROTOCOL_VERSION {
                    return Err(PeerErr::Incompatible(v.version));
                }

                codec.write_message(writer, &Message::Verack).await?;
                theirs = Some(v);
            }
            Message::Verack if !got_verack => got_verack = true,
            other => return Err(PeerErr::Unexpected(other.command())),
        }
    }

    theirs.ok_or(PeerErr::Unexpected("verack"))
}

/// Drives a connection until it closes, times out or the peer is removed
#[tracing::instrument(name = "peer", skip(node, stream))]
pub(crate) async fn run_peer<B: ChainBackend>(node: Node<B>, stream: TcpStream, addr: SocketAddr, inbound: bool) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY for {}: {}", addr, err);
    }

    let codec = node.codec();
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = BytesMut::with_capacity(4096);
    let ours = node.version_msg();

    let theirs = match timeout(
        HANDSHAKE_TIMEOUT,
        handshake(codec, &ours, &mut reader, &mut writer, &mut buf),
    )
    .await
    .unwrap_or(Err(PeerErr::TimedOut))
    {
        Ok(v) => v,
        Err(err) => {
            debug!("Handshake with {} failed: {}", addr, err);
            return;
        }
    };

    let (sender, mut outbound) = mpsc::channel::<Message>(PEER_QUEUE_SIZE);
    let kill = Arc::new(Notify::new());
    let id = node.register_peer(
        |id| PeerInfo {
            id,
            addr,
            inbound,
            version: theirs.version,
            user_agent: theirs.user_agent.clone(),
            best_height: theirs.best_height,
            connected_at: unix_now(),
            ban_score: 0,
        },
        sender.clone(),
        kill.clone(),
    );

    info!(
        "Connected to peer {} ({} {}, height {})",
        addr,
        if inbound { "inbound" } else { "outbound" },
        theirs.user_agent,
        theirs.best_height
    );

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Err(err) = codec.write_message(&mut writer, &msg).await {
                debug!("Write to {} failed: {}", addr, err);
                break;
            }
        }
    });

    if node.notify(NodeEvent::Connected(id)).await {
        read_loop(&node, id, codec, &mut reader, &mut buf, &sender, &kill).await;
    }

    node.remove_peer(id);
    writer_task.abort();
    node.notify(NodeEvent::Disconnected(id)).await;
    info!("Disconnected from peer {}", addr);
}

async fn read_loop<B: ChainBackend, R: AsyncRead + Unpin>(
    node: &Node<B>,
    id: PeerId,
    codec: FrameCodec,
    reader: &mut R,
    buf: &mut BytesMut,
    sender: &mpsc::Sender<Message>,
    kill: &Notify,
) {
    let mut last_seen = Instant::now();
    let mut ping_nonce = None;

    loop {
        tokio::select! {
            _ = kill.notified() => return,

            res = timeout(PING_INTERVAL, codec.read_message(reader, buf)) => match res {
                Err(_) => {
                    if last_seen.elapsed() >= IDLE_TIMEOUT {
                        debug!("Peer {} idle, disconnecting", id);
                        return;
                    }

                    let nonce = rand::random::<u64>();
                    ping_nonce = Some(nonce);
                    if sender.send(Message::Ping(nonce)).await.is_err() {
                        return;
                    }
                }

                Ok(Err(err)) => {
                    if err.ban_score() > 0 {
                        node.punish(id, err.ban_score());
                    }
                    debug!("Peer {} read error: {}", id, err);
                    return;
                }

                Ok(Ok(msg)) => {
                    last_seen = Instant::now();

                    match msg {
                        Message::Ping(nonce) => {
                            if sender.send(Message::Pong(nonce)).await.is_err() {
                                return;
                            }
                        }

                        Message::Pong(nonce) => {
                            if ping_nonce == Some(nonce) {
                                ping_nonce = None;
                            }
                        }

                        Message::Version(_) | Message::Verack => {
                            if node.punish(id, HANDSHAKE_REPLAY_SCORE) {
                                return;
                            }
                        }

                        other => {
                            if !node.notify(NodeEvent::Message(id, other)).await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, ChainConfig, ChainOptions, MemoryBackend};
    use tokio::net::TcpListener;

    fn new_node() -> (Node<MemoryBackend>, mpsc::Receiver<NodeEvent>) {
        let chain = Chain::new(ChainConfig::regtest(), MemoryBackend::new(), ChainOptions::default()).unwrap();
        Node::new(Arc::new(chain), NodeOptions::default())
    }

    fn version(nonce: u64) -> VersionMsg {
        VersionMsg {
            version: PROTOCOL_VERSION,
            best_height: 3,
            nonce,
            timestamp: 1_700_000_000,
            listen_port: 0,
            user_agent: "/test/".to_owned(),
        }
    }

    #[tokio::test]
    async fn handshake_completes_both_ways() {
        let codec = FrameCodec::new(*b"LUNR");
        let (a, b) = tokio::io::duplex(1024);
        let (mut ar, mut aw) = tokio::io::split(a);
        let (mut br, mut bw) = tokio::io::split(b);

        let left = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            handshake(codec, &version(1), &mut ar, &mut aw, &mut buf).await
        });
        let mut buf = BytesMut::new();
        let right = handshake(codec, &version(2), &mut br, &mut bw, &mut buf).await.unwrap();

        assert_eq!(right.nonce, 1);
        assert_eq!(left.await.unwrap().unwrap().nonce, 2);
    }

    #[tokio::test]
    async fn it_detects_self_connections() {
        let codec = FrameCodec::new(*b"LUNR");
        let (a, b) = tokio::io::duplex(1024);
        let (mut ar, mut aw) = tokio::io::split(a);
        let (mut br, mut bw) = tokio::io::split(b);

        let left = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            handshake(codec, &version(7), &mut ar, &mut aw, &mut buf).await
        });
        let mut buf = BytesMut::new();
        let right = handshake(codec, &version(7), &mut br, &mut bw, &mut buf).await;

        assert!(matches!(right, Err(PeerErr::SelfConnection)));
        assert!(left.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn it_rejects_other_protocol_versions() {
        let codec = FrameCodec::new(*b"LUNR");

        for other in [PROTOCOL_VERSION - 1, PROTOCOL_VERSION + 1] {
            let (a, b) = tokio::io::duplex(1024);
            let (mut ar, mut aw) = tokio::io::split(a);
            let (mut br, mut bw) = tokio::io::split(b);

            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                let theirs = VersionMsg {
                    version: other,
                    ..version(9)
                };
                let _ = handshake(codec, &theirs, &mut ar, &mut aw, &mut buf).await;
            });

            let mut buf = BytesMut::new();
            let res = handshake(codec, &version(2), &mut br, &mut bw, &mut buf).await;
            assert!(matches!(res, Err(PeerErr::Incompatible(v)) if v == other));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connections_time_out_in_handshake() {
        let (node, _events) = new_node();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _silent = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, addr) = listener.accept().await.unwrap();

        let started = Instant::now();
        run_peer(node.clone(), stream, addr, true).await;

        assert!(started.elapsed() >= HANDSHAKE_TIMEOUT);
        assert_eq!(node.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_peers_are_pinged_then_dropped() {
        let (node, _events) = new_node();
        let (mut ours, _theirs) = tokio::io::duplex(1024);
        let (sender, mut outbound) = mpsc::channel(8);
        let kill = Notify::new();
        let mut buf = BytesMut::new();

        let started = Instant::now();
        read_loop(&node, 1, node.codec(), &mut ours, &mut buf, &sender, &kill).await;

        assert!(started.elapsed() >= IDLE_TIMEOUT);
        assert!(started.elapsed() < IDLE_TIMEOUT + PING_INTERVAL);
        assert!(matches!(outbound.try_recv(), Ok(Message::Ping(_))));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn it_rejects_traffic_before_handshake() {
        let codec = FrameCodec::new(*b"LUNR");
        let (a, b) = tokio::io::duplex(1024);
        let (mut ar, mut aw) = tokio::io::split(a);
        let (mut br, mut bw) = tokio::io::split(b);

        tokio::spawn(async move {
            codec.write_message(&mut aw, &Message::Ping(1)).await.unwrap();
            let mut buf = BytesMut::new();
            let _ = codec.read_message(&mut ar, &mut buf).await;
        });
        let mut buf = BytesMut::new();
        let res = handshake(codec, &version(2), &mut br, &mut bw, &mut buf).await;
        assert!(matches!(res, Err(PeerErr::Unexpected("ping"))));
    }
}
