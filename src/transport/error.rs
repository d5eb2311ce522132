//! Transport-level errors (§7).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("radio is not powered on")]
    RadioUnavailable,

    #[error("connect attempt to {device} timed out")]
    Timeout { device: String },

    #[error("pending notification queue saturated, dropped oldest update")]
    BackpressureDrop,

    #[error("no link to {device}")]
    NoSuchLink { device: String },

    #[error("platform radio error: {0}")]
    Platform(String),
}
