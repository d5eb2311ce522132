//! Mesh engine errors (§7).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("radio is not powered on")]
    RadioUnavailable,

    #[error(transparent)]
    Link(#[from] crate::transport::LinkError),

    #[error(transparent)]
    Codec(#[from] crate::protocol::CodecError),
}
