//! meshtalk: a peer-to-peer mesh messaging transport over Bluetooth Low
//! Energy.
//!
//! [`protocol`] is the pure wire format: framing, padding, announce
//! TLVs, fragmentation. [`transport`] is the radio contract and link
//! state machines. [`mesh`] is the single-writer engine that ties them
//! together. [`app`] is the thin upper-layer surface a UI holds.

pub mod app;
pub mod config;
pub mod identity;
pub mod mesh;
pub mod protocol;
pub mod transport;

pub use app::App;
pub use mesh::{EngineCommand, MeshEvent};

/// Crate-wide result alias for the CLI binary and app-level glue; the
/// core engine itself never surfaces an error past a log line (§7).
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
