//! Known-peer bookkeeping (§4.H).
//!
//! A peer only exists here once its Announce has been seen and bound to
//! a link; discovered-but-unconnected devices live in the link manager,
//! not here.

use std::collections::HashMap;
use std::time::Instant;

/// Nickname plus last-activity bookkeeping for one peer id.
#[derive(Debug, Clone)]
pub struct Peer {
    pub nickname: String,
    pub last_seen: Instant,
}

/// `peer_id -> Peer` map the engine consults for nickname lookups and
/// `peer_list_changed` events.
#[derive(Default)]
pub struct PeerMap {
    peers: HashMap<String, Peer>,
}

impl PeerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or refresh a peer's nickname. Returns `true` the first time
    /// this peer id is seen, since that's when the engine emits
    /// `peer_connected` (§4.H).
    pub fn upsert(&mut self, peer_id: &str, nickname: String) -> bool {
        let now = Instant::now();
        match self.peers.get_mut(peer_id) {
            Some(peer) => {
                peer.nickname = nickname;
                peer.last_seen = now;
                false
            }
            None => {
                self.peers.insert(peer_id.to_string(), Peer { nickname, last_seen: now });
                true
            }
        }
    }

    pub fn remove(&mut self, peer_id: &str) -> Option<Peer> {
        self.peers.remove(peer_id)
    }

    /// Nickname for `peer_id`, or the fallback used for messages from an
    /// unannounced sender (§4.H: "fallback anon").
    pub fn nickname_or_anon(&self, peer_id: &str) -> String {
        self.peers
            .get(peer_id)
            .map(|p| p.nickname.clone())
            .unwrap_or_else(|| "anon".to_string())
    }

    pub fn ids(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn nicknames(&self) -> HashMap<String, String> {
        self.peers.iter().map(|(id, peer)| (id.clone(), peer.nickname.clone())).collect()
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_upsert_reports_newly_connected() {
        let mut peers = PeerMap::new();
        assert!(peers.upsert("abc", "alice".to_string()));
        assert!(!peers.upsert("abc", "alice2".to_string()));
        assert_eq!(peers.nickname_or_anon("abc"), "alice2");
    }

    #[test]
    fn unknown_peer_falls_back_to_anon() {
        let peers = PeerMap::new();
        assert_eq!(peers.nickname_or_anon("nope"), "anon");
    }

    #[test]
    fn remove_returns_the_removed_peer() {
        let mut peers = PeerMap::new();
        peers.upsert("abc", "alice".to_string());
        let removed = peers.remove("abc").unwrap();
        assert_eq!(removed.nickname, "alice");
        assert!(!peers.contains("abc"));
    }
}
