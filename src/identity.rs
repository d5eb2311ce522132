//! Peer identifiers (§6).
//!
//! A peer id is always a 16-character lowercase hex string (8 bytes). It
//! is derived once per node from random bytes and otherwise treated as an
//! opaque, comparable, hashable string — nothing here assigns it meaning
//! beyond "stable identity for this process".

use rand::RngCore;

pub const PEER_ID_HEX_LEN: usize = 16;

/// Generate a fresh random peer id for this node.
pub fn generate_peer_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `true` iff `candidate` is exactly 16 hex characters.
pub fn is_valid_peer_id(candidate: &str) -> bool {
    candidate.len() == PEER_ID_HEX_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Deterministically derive a peer-id-shaped candidate from an arbitrary
/// byte source (e.g. a discovered device's platform UUID), for the tie-break
/// comparison in §4.F step 4. Two nodes hashing the same device identifier
/// always land on the same candidate id, which is all the tie-break needs.
pub fn derive_candidate_peer_id(source: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(source);
    hex::encode(&digest[..8])
}
