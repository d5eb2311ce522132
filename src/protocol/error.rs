//! Protocol-level errors — codec failures only (§7).

use thiserror::Error;

/// Errors raised by [`crate::protocol::codec`] and its TLV sub-codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("packet is malformed: {0}")]
    Malformed(String),

    #[error("decompressed payload length {actual} does not match embedded length {expected}")]
    DecompressionMismatch { expected: u32, actual: u32 },

    #[error("invalid field: {0}")]
    InvalidField(String),
}

pub type CodecResult<T> = Result<T, CodecError>;
