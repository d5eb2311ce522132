//! Wire-format constants and compile-time tunables.
//!
//! These values are the protocol's only source of truth for sizing and
//! timing; every other module imports from here rather than hard-coding
//! a number a second time.

use std::time::Duration;

/// Current wire format version. Bumped only on a breaking header change.
pub const PROTOCOL_VERSION: u8 = 1;

/// Bytes of fixed + sender header before any optional recipient/payload.
/// `version(1) + type(1) + ttl(1) + timestamp(8) + flags(1) + payload_length(2) + sender_id(8)`.
pub const HEADER_SIZE: usize = 22;

/// Size of `recipient_id` when the recipient-present flag is set.
pub const RECIPIENT_ID_SIZE: usize = 8;

/// Size of `sender_id`, and of `recipient_id` when present.
pub const NODE_ID_SIZE: usize = 8;

// Flag bit positions (§3).
pub const FLAG_RECIPIENT_PRESENT: u8 = 1 << 0;
pub const FLAG_COMPRESSED: u8 = 1 << 1;

// Packet types (§3).
pub const PACKET_TYPE_ANNOUNCE: u8 = 1;
pub const PACKET_TYPE_MESSAGE: u8 = 2;
pub const PACKET_TYPE_LEAVE: u8 = 3;
pub const PACKET_TYPE_FRAGMENT: u8 = 4;

/// Announce TLV type tags (§3).
pub const ANNOUNCE_TLV_NICKNAME: u8 = 0x01;
pub const ANNOUNCE_TLV_PEER_ID: u8 = 0x02;

/// Padding block sizes, smallest-first (§4.B).
pub const PADDING_BLOCK_SIZES: [usize; 4] = [256, 512, 1024, 2048];

/// Fragment payload fixed overhead: `fragment_id(8) + index(2) + total(2)`.
pub const FRAGMENT_OVERHEAD: usize = 12;

/// Assumed per-packet overhead (header plus typical sender/recipient) used
/// when sizing fragment chunks against the effective write length (§4.E).
pub const PACKET_OVERHEAD: usize = 30;

/// Smallest chunk size the fragmenter will ever produce, even against a
/// pathologically small effective write length.
pub const MIN_FRAGMENT_CHUNK: usize = 32;

pub const COMPRESSION_THRESHOLD_BYTES: usize = 256;
pub const DEFAULT_FRAGMENT_SIZE: usize = 150;
pub const MESSAGE_TTL_DEFAULT: u8 = 8;

pub const DEDUP_WINDOW_PACKETS: Duration = Duration::from_secs(30);
pub const DEDUP_MAX_PACKETS: usize = 1000;
pub const DEDUP_WINDOW_FRAGMENTS: Duration = Duration::from_secs(60);
pub const DEDUP_MAX_FRAGMENTS: usize = 2000;

pub const FRAGMENT_SLOT_LIFETIME: Duration = Duration::from_secs(30);
pub const FRAGMENT_SENT_ECHO_WINDOW: Duration = Duration::from_secs(60);

pub const PEER_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_OUTBOUND_LINKS: usize = 10;
pub const CONNECT_RATE_LIMIT: Duration = Duration::from_secs(2);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const RSSI_CUTOFF_DBM: i16 = -80;

pub const ANNOUNCE_MIN_INTERVAL: Duration = Duration::from_secs(2);
pub const PERIODIC_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(30);
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10);

pub const POST_CONNECT_ANNOUNCE_DELAY: Duration = Duration::from_millis(500);
pub const RECIPROCAL_ANNOUNCE_DELAY: Duration = Duration::from_millis(100);

pub const RELAY_JITTER_MIN_MS: u64 = 10;
pub const RELAY_JITTER_MAX_MS: u64 = 50;

pub const FRAGMENT_PACE_SMALL_GROUP_MS: u64 = 20;
pub const FRAGMENT_PACE_LARGE_GROUP_MS: u64 = 30;
/// Fragment groups at or below this total use the faster pacing delay.
pub const FRAGMENT_PACE_SMALL_GROUP_MAX_TOTAL: u16 = 10;

/// Adaptive scanner duty cycles, `(scan_on, scan_off)` (§4.G).
pub const SCAN_CYCLE_NORMAL: (Duration, Duration) = (Duration::from_secs(10), Duration::from_secs(5));
pub const SCAN_CYCLE_DENSE: (Duration, Duration) = (Duration::from_secs(5), Duration::from_secs(10));
pub const SCAN_CYCLE_SPARSE: (Duration, Duration) = (Duration::from_secs(5), Duration::from_secs(15));

/// Traffic trace window used to pick the scanner's mode (§4.G).
pub const TRAFFIC_TRACE_WINDOW: Duration = Duration::from_secs(10);

pub const PENDING_NOTIFICATION_CAP: usize = 50;
