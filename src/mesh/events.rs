//! Upper-layer event callbacks (§6).

/// Events the mesh engine delivers up to UI/app code. Mirrors the
/// upper-layer API's callback list verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    PublicMessage {
        from_peer_id: String,
        nickname: String,
        content: String,
        timestamp_ms: u64,
    },
    PeerConnected {
        peer_id: String,
    },
    PeerDisconnected {
        peer_id: String,
    },
    PeerListChanged {
        peers: Vec<String>,
        nicknames: std::collections::HashMap<String, String>,
    },
}
