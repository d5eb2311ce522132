//! Wire protocol: packet framing, padding, announce TLVs, and fragmentation.
//!
//! This module owns everything the spec calls "the CORE": the binary
//! packet format (§3, §4.A), block padding (§4.B), the announce payload
//! TLVs (§4.C), and the fragmenter/reassembler (§4.E). None of it talks
//! to a radio; it is pure data transformation, which is what makes the
//! round-trip and fragmentation invariants in §8 testable as plain unit
//! tests with no async runtime involved.

pub mod announce;
pub mod codec;
pub mod constants;
pub mod error;
pub mod fragment;
pub mod padding;

pub use error::{CodecError, CodecResult};

use constants::{
    PACKET_TYPE_ANNOUNCE, PACKET_TYPE_FRAGMENT, PACKET_TYPE_LEAVE, PACKET_TYPE_MESSAGE,
};

/// An 8-byte node identifier as it appears on the wire (`sender_id` /
/// `recipient_id` / `fragment_id`).
pub type NodeId = [u8; 8];

/// The mesh transport's single wire PDU (§3).
///
/// `payload_length` is not a field here: it is a wire-only quantity,
/// always equal to `payload.len()` after decoding, and recomputed by the
/// codec on encode. Reserved flag bits 2-7 are likewise not represented;
/// the codec always emits them as zero and nothing reads them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub packet_type: u8,
    pub ttl: u8,
    pub timestamp_ms: u64,
    pub sender_id: NodeId,
    pub recipient_id: Option<NodeId>,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(packet_type: u8, ttl: u8, timestamp_ms: u64, sender_id: NodeId, payload: Vec<u8>) -> Self {
        Self {
            version: constants::PROTOCOL_VERSION,
            packet_type,
            ttl,
            timestamp_ms,
            sender_id,
            recipient_id: None,
            payload,
        }
    }

    /// The canonical deduplication identifier (§3): `sender_id hex,
    /// timestamp_ms, type`, joined with `-`.
    pub fn dedup_id(&self) -> String {
        format!(
            "{}-{}-{}",
            hex::encode(self.sender_id),
            self.timestamp_ms,
            self.packet_type
        )
    }

    pub fn kind(&self) -> Option<PacketKind> {
        PacketKind::from_u8(self.packet_type)
    }

    /// A copy of this packet with `ttl` decremented by one, as produced by
    /// a relay (§4.H, invariant 7).
    pub fn decrement_ttl(&self) -> Self {
        let mut next = self.clone();
        next.ttl = next.ttl.saturating_sub(1);
        next
    }
}

/// Typed view over `Packet::packet_type` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Announce,
    Message,
    Leave,
    Fragment,
}

impl PacketKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            PACKET_TYPE_ANNOUNCE => Some(Self::Announce),
            PACKET_TYPE_MESSAGE => Some(Self::Message),
            PACKET_TYPE_LEAVE => Some(Self::Leave),
            PACKET_TYPE_FRAGMENT => Some(Self::Fragment),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Announce => PACKET_TYPE_ANNOUNCE,
            Self::Message => PACKET_TYPE_MESSAGE,
            Self::Leave => PACKET_TYPE_LEAVE,
            Self::Fragment => PACKET_TYPE_FRAGMENT,
        }
    }
}
