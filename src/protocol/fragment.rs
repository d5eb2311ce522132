//! Fragmentation and reassembly (§4.E).
//!
//! Splitting operates on the fully **encoded** wire bytes of the original
//! packet (post-compression, post-flags), not the raw payload: the
//! fragment payload invariant ("concatenating chunks of a fragment group
//! in index order yields a valid packet decodable by A", §3) only holds
//! if what's concatenated is the thing `codec::decode` expects — the
//! encoded byte stream, not a pre-compression payload. The outer
//! type-Fragment `Packet` (sender/recipient/timestamp/ttl) already
//! carries the header fields a chunk needs in flight, so a chunk itself
//! only needs to carry its own group identity and slice of data.
//! Reassembly state lives in [`Reassembler`], a slot map keyed by
//! `(sender_id, fragment_id)` that self-expires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::RngCore;

use super::constants::{
    FRAGMENT_OVERHEAD, FRAGMENT_PACE_LARGE_GROUP_MS, FRAGMENT_PACE_SMALL_GROUP_MAX_TOTAL,
    FRAGMENT_PACE_SMALL_GROUP_MS, FRAGMENT_SLOT_LIFETIME, MIN_FRAGMENT_CHUNK, PACKET_OVERHEAD,
};
use super::NodeId;

/// One chunk of a fragmented original packet's encoded byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentChunk {
    pub fragment_id: NodeId,
    pub index: u16,
    pub total: u16,
    pub data: Vec<u8>,
}

impl FragmentChunk {
    /// Serialize the fragment-specific payload, i.e. what rides inside a
    /// type-Fragment `Packet::payload` (the packet header itself carries
    /// sender/recipient/timestamp/ttl, so they aren't repeated here).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAGMENT_OVERHEAD + self.data.len());
        out.extend_from_slice(&self.fragment_id);
        out.extend_from_slice(&self.index.to_be_bytes());
        out.extend_from_slice(&self.total.to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < FRAGMENT_OVERHEAD {
            return None;
        }
        let mut fragment_id = [0u8; 8];
        fragment_id.copy_from_slice(&payload[0..8]);
        let index = u16::from_be_bytes([payload[8], payload[9]]);
        let total = u16::from_be_bytes([payload[10], payload[11]]);
        let data = payload[12..].to_vec();
        Some(Self {
            fragment_id,
            index,
            total,
            data,
        })
    }

    /// The dedup key for fragment-level suppression (§4.E):
    /// `sender_id:fragment_id:index`. `sender_id` comes from the outer
    /// type-Fragment packet, since a chunk no longer carries its own copy.
    pub fn dedup_key(&self, sender_id: &NodeId) -> String {
        format!("{}:{}:{}", hex::encode(sender_id), hex::encode(self.fragment_id), self.index)
    }
}

/// Split `encoded` — the already wire-encoded bytes of the original
/// packet — into chunks sized against `effective_write_len`, per §4.E's
/// chunk-size formula. `rng` supplies the random `fragment_id`; callers
/// in production pass `rand::thread_rng()`, tests pass a seeded one.
pub fn split(encoded: &[u8], effective_write_len: usize, rng: &mut impl RngCore) -> Vec<FragmentChunk> {
    let chunk_size = effective_write_len
        .saturating_sub(FRAGMENT_OVERHEAD)
        .saturating_sub(PACKET_OVERHEAD)
        .max(MIN_FRAGMENT_CHUNK);

    let mut fragment_id = [0u8; 8];
    rng.fill_bytes(&mut fragment_id);

    let chunks: Vec<&[u8]> = if encoded.is_empty() {
        vec![&encoded[0..0]]
    } else {
        encoded.chunks(chunk_size).collect()
    };
    let total = chunks.len() as u16;

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| FragmentChunk {
            fragment_id,
            index: i as u16,
            total,
            data: chunk.to_vec(),
        })
        .collect()
}

/// Per-index pacing delay for fragment emission (§4.E): smaller groups get
/// a tighter cadence than larger ones.
pub fn pace_delay(total: u16) -> Duration {
    if total <= FRAGMENT_PACE_SMALL_GROUP_MAX_TOTAL {
        Duration::from_millis(FRAGMENT_PACE_SMALL_GROUP_MS)
    } else {
        Duration::from_millis(FRAGMENT_PACE_LARGE_GROUP_MS)
    }
}

struct Slot {
    total: u16,
    chunks: HashMap<u16, Vec<u8>>,
    created_at: Instant,
}

/// Outcome of feeding a chunk into the reassembler.
pub enum ReassemblyOutcome {
    /// More chunks are still needed.
    Pending,
    /// Every index for this `(sender_id, fragment_id)` has arrived; the
    /// concatenated bytes are the original packet's encoded wire form,
    /// ready to be handed to [`crate::protocol::codec::decode`].
    Complete { encoded: Vec<u8> },
}

/// Slot map for in-progress fragment reassembly, keyed by
/// `(sender_id, fragment_id)` (§4.E).
#[derive(Default)]
pub struct Reassembler {
    slots: HashMap<(NodeId, NodeId), Slot>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk in, identified by the sender of the outer
    /// type-Fragment packet it arrived on. Returns `Complete` exactly
    /// once per fragment_id, the moment the last missing index arrives.
    pub fn accept(&mut self, sender_id: NodeId, chunk: FragmentChunk) -> ReassemblyOutcome {
        let key = (sender_id, chunk.fragment_id);
        let slot = self.slots.entry(key).or_insert_with(|| Slot {
            total: chunk.total,
            chunks: HashMap::new(),
            created_at: Instant::now(),
        });

        slot.chunks.insert(chunk.index, chunk.data);

        if slot.chunks.len() == slot.total as usize {
            let slot = self.slots.remove(&key).expect("slot present, just inserted into");
            let mut encoded = Vec::new();
            for i in 0..slot.total {
                if let Some(part) = slot.chunks.get(&i) {
                    encoded.extend_from_slice(part);
                } else {
                    // Defensive: length check above guarantees every index is
                    // present, but don't panic if that invariant is ever violated.
                    return ReassemblyOutcome::Pending;
                }
            }
            ReassemblyOutcome::Complete { encoded }
        } else {
            ReassemblyOutcome::Pending
        }
    }

    /// Drop slots older than `fragment_slot_lifetime_s` (§5). Call
    /// periodically from the maintenance timer.
    pub fn sweep_expired(&mut self) {
        self.slots
            .retain(|_, slot| slot.created_at.elapsed() < FRAGMENT_SLOT_LIFETIME);
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
