use dashmap::DashMap;
use libp2p::{Multiaddr, PeerId};
use serde::Serialize;
use std::collections::HashSet;

/// Directory entry for a connected fleet peer.
#[derive(Debug, Clone)]
pub struct FleetPeerEntry {
    /// Multiaddresses advertised by this peer.
    pub multiaddrs: Vec<Multiaddr>,
    /// Gossip topics this peer is subscribed to.
    pub topics: HashSet<String>,
    /// Last seen timestamp.
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

impl FleetPeerEntry {
    fn empty() -> Self {
        Self {
            multiaddrs: Vec::new(),
            topics: HashSet::new(),
            last_seen: chrono::Utc::now(),
        }
    }
}

/// Tracks connected fleet peers, their addresses, and topic subscriptions.
/// Populated from identify events and gossipsub subscription events; read by
/// the operational info endpoint.
pub struct FleetDirectory {
    peers: DashMap<PeerId, FleetPeerEntry>,
}

impl FleetDirectory {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Record a peer's advertised multiaddresses (identify event).
    pub fn update_multiaddrs(&self, peer_id: &PeerId, multiaddrs: Vec<Multiaddr>) {
        let mut entry = self.peers.entry(*peer_id).or_insert_with(FleetPeerEntry::empty);
        entry.multiaddrs = multiaddrs;
        entry.last_seen = chrono::Utc::now();
    }

    /// Record a topic subscription (gossipsub subscribe event).
    pub fn add_topic(&self, peer_id: &PeerId, topic: &str) {
        let mut entry = self.peers.entry(*peer_id).or_insert_with(FleetPeerEntry::empty);
        entry.topics.insert(topic.to_string());
        entry.last_seen = chrono::Utc::now();
    }

    /// Drop a topic subscription (gossipsub unsubscribe event).
    pub fn remove_topic(&self, peer_id: &PeerId, topic: &str) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.topics.remove(topic);
        }
    }

    /// Remove a peer on disconnect.
    pub fn unregister_peer(&self, peer_id: &PeerId) {
        self.peers.remove(peer_id);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Serializable view for the operational surface.
    pub fn snapshot(&self) -> Vec<FleetPeerInfo> {
        self.peers
            .iter()
            .map(|entry| {
                let peer = entry.value();
                FleetPeerInfo {
                    peer_id: entry.key().to_string(),
                    multiaddrs: peer.multiaddrs.iter().map(|a| a.to_string()).collect(),
                    topics: peer.topics.iter().cloned().collect(),
                    last_seen: peer.last_seen.to_rfc3339(),
                }
            })
            .collect()
    }
}

impl Default for FleetDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Simplified peer info for the fleet info endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FleetPeerInfo {
    pub peer_id: String,
    pub multiaddrs: Vec<String>,
    pub topics: Vec<String>,
    pub last_seen: String,
}
