// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2024 The Lunacoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::node::wire::Message;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use tokio::sync::{mpsc, Notify};
use triomphe::Arc;

/// Accumulated score at which a peer is disconnected and banned
pub const BAN_THRESHOLD: u32 = 100;

/// Ban duration in seconds
pub const BAN_DURATION: i64 = 24 * 60 * 60;

/// Max remembered addresses for peer discovery
pub const MAX_KNOWN_ADDRS: usize = 2_048;

pub type PeerId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub inbound: bool,
    pub version: u32,
    pub user_agent: String,

    /// Best height announced in the handshake, raised by later block announcements
    pub best_height: u64,

    /// Unix timestamp of the completed handshake
    pub connected_at: i64,
    pub ban_score: u32,
}

struct PeerEntry {
    info: PeerInfo,
    sender: mpsc::Sender<Message>,

    /// Wakes the connection task when the peer is removed
    kill: Arc<Notify>,
}

/// Connected peers, misbehaviour scores and the temporary blacklist
#[derive(Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, PeerEntry>,
    banned: HashMap<IpAddr, i64>,
    known_addrs: HashSet<SocketAddr>,
    next_id: PeerId,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> PeerId {
        self.next_id += 1;
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn insert(&mut self, info: PeerInfo, sender: mpsc::Sender<Message>, kill: Arc<Notify>) {
        self.peers.insert(info.id, PeerEntry { info, sender, kill });
    }

    /// Drops the peer and signals its connection task to stop
    pub fn remove(&mut self, id: PeerId) -> Option<PeerInfo> {
        self.peers.remove(&id).map(|e| {
            e.kill.notify_one();
            e.info
        })
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerInfo> {
        self.peers.get(&id).map(|e| &e.info)
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut out: Vec<_> = self.peers.values().map(|e| e.info.clone()).collect();
        out.sort_by_key(|p| p.id);
        out
    }

    pub fn is_connected_to(&self, addr: &SocketAddr) -> bool {
        self.peers.values().any(|e| &e.info.addr == addr)
    }

    pub fn sender(&self, id: PeerId) -> Option<mpsc::Sender<Message>> {
        self.peers.get(&id).map(|e| e.sender.clone())
    }

    /// Every peer except `origin`
    pub fn relay_targets(&self, origin: Option<PeerId>) -> Vec<(PeerId, mpsc::Sender<Message>)> {
        self.peers
            .iter()
            .filter(|(id, _)| Some(**id) != origin)
            .map(|(id, e)| (*id, e.sender.clone()))
            .collect()
    }

    pub fn update_height(&mut self, id: PeerId, height: u64) {
        if let Some(entry) = self.peers.get_mut(&id) {
            entry.info.best_height = entry.info.best_height.max(height);
        }
    }

    /// Peer with the best announced height above `height`
    pub fn best_peer_above(&self, height: u64) -> Option<PeerId> {
        self.peers
            .values()
            .filter(|e| e.info.best_height > height)
            .max_by_key(|e| (e.info.best_height, std::cmp::Reverse(e.info.id)))
            .map(|e| e.info.id)
    }

    /// Adds to a peer's score. Returns true if the peer crossed the threshold,
    /// in which case its address is banned until `now + BAN_DURATION`.
    pub fn misbehaving(&mut self, id: PeerId, score: u32, now: i64) -> bool {
        let entry = match self.peers.get_mut(&id) {
            Some(entry) => entry,
            None => return false,
        };

        entry.info.ban_score = entry.info.ban_score.saturating_add(score);

        if entry.info.ban_score >= BAN_THRESHOLD {
            let ip = entry.info.addr.ip();
            self.banned.insert(ip, now + BAN_DURATION);
            return true;
        }

        false
    }

    pub fn is_banned(&self, ip: &IpAddr, now: i64) -> bool {
        self.banned.get(ip).map_or(false, |until| *until > now)
    }

    /// Banned addresses with the time their ban ends
    pub fn banned(&self, now: i64) -> Vec<(IpAddr, i64)> {
        let mut out: Vec<_> = self
            .banned
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(ip, until)| (*ip, *until))
            .collect();
        out.sort();
        out
    }

    pub fn prune_bans(&mut self, now: i64) {
        self.banned.retain(|_, until| *until > now);
    }

    pub fn add_known_addrs(&mut self, addrs: impl IntoIterator<Item = SocketAddr>) {
        for addr in addrs {
            if self.known_addrs.len() >= MAX_KNOWN_ADDRS {
                break;
            }
            self.known_addrs.insert(addr);
        }
    }

    pub fn known_addrs(&self, limit: usize) -> Vec<SocketAddr> {
        self.known_addrs.iter().take(limit).copied().collect()
    }

    /// Known addresses we are neither connected to nor banning
    pub fn dial_candidates(&self, limit: usize, now: i64) -> Vec<SocketAddr> {
        self.known_addrs
            .iter()
            .filter(|a| !self.is_connected_to(a) && !self.is_banned(&a.ip(), now))
            .take(limit)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(table: &mut PeerTable, addr: &str) -> PeerInfo {
        PeerInfo {
            id: table.next_id(),
            addr: addr.parse().unwrap(),
            inbound: true,
            version: 1,
            user_agent: "/test/".to_owned(),
            best_height: 0,
            connected_at: 0,
            ban_score: 0,
        }
    }

    #[test]
    fn it_bans_at_threshold() {
        let mut table = PeerTable::new();
        let (tx, _rx) = mpsc::channel(1);
        let peer = info(&mut table, "10.0.0.1:9333");
        let id = peer.id;
        table.insert(peer, tx, Arc::new(Notify::new()));

        assert!(!table.misbehaving(id, 50, 1_000));
        assert!(!table.misbehaving(id, 20, 1_000));
        assert!(table.misbehaving(id, 50, 1_000));

        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(table.is_banned(&ip, 1_000));
        assert!(table.is_banned(&ip, 1_000 + BAN_DURATION - 1));
        assert!(!table.is_banned(&ip, 1_000 + BAN_DURATION));

        table.prune_bans(1_000 + BAN_DURATION);
        assert!(table.banned(0).is_empty());
    }

    #[tokio::test]
    async fn removal_wakes_connection() {
        let mut table = PeerTable::new();
        let (tx, _rx) = mpsc::channel(1);
        let kill = Arc::new(Notify::new());
        let peer = info(&mut table, "10.0.0.1:9333");
        let id = peer.id;
        table.insert(peer, tx, kill.clone());

        assert!(table.remove(id).is_some());
        kill.notified().await;
        assert!(table.is_empty());
    }

    #[test]
    fn relay_skips_origin() {
        let mut table = PeerTable::new();
        let mut ids = vec![];
        for port in 0..3 {
            let (tx, _rx) = mpsc::channel(1);
            let peer = info(&mut table, &format!("10.0.0.{}:9333", port + 1));
            ids.push(peer.id);
            table.insert(peer, tx, Arc::new(Notify::new()));
        }

        let mut targets: Vec<_> = table.relay_targets(Some(ids[1])).into_iter().map(|(id, _)| id).collect();
        targets.sort();
        assert_eq!(targets, vec![ids[0], ids[2]]);
        assert_eq!(table.relay_targets(None).len(), 3);
    }

    #[test]
    fn it_tracks_best_height() {
        let mut table = PeerTable::new();
        let (tx, _rx) = mpsc::channel(1);
        let a = info(&mut table, "10.0.0.1:9333");
        let b = info(&mut table, "10.0.0.2:9333");
        let (a_id, b_id) = (a.id, b.id);
        table.insert(a, tx.clone(), Arc::new(Notify::new()));
        table.insert(b, tx, Arc::new(Notify::new()));

        table.update_height(a_id, 5);
        table.update_height(b_id, 9);
        table.update_height(b_id, 3);
        assert_eq!(table.get(b_id).unwrap().best_height, 9);
        assert_eq!(table.best_peer_above(4), Some(b_id));
        assert_eq!(table.best_peer_above(9), None);
    }

    #[test]
    fn dial_candidates_skip_connected_and_banned() {
        let mut table = PeerTable::new();
        let (tx, _rx) = mpsc::channel(1);
        let peer = info(&mut table, "10.0.0.1:9333");
        let id = peer.id;
        table.insert(peer, tx, Arc::new(Notify::new()));
        table.misbehaving(id, BAN_THRESHOLD, 0);

        table.add_known_addrs(vec![
            "10.0.0.1:9333".parse().unwrap(),
            "10.0.0.1:9334".parse().unwrap(),
            "10.0.0.2:9333".parse().unwrap(),
        ]);

        assert_eq!(table.dial_candidates(10, 1), vec!["10.0.0.2:9333".parse::<SocketAddr>().unwrap()]);
    }
}
