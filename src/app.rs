//! Upper-layer application surface (§6 "Upper-layer API").
//!
//! `App` is the thing a UI holds: it owns the command channel into the
//! running [`MeshEngine`] and a cache of the last-known peer list, kept
//! current by draining [`MeshEvent`]s in a background task. The engine
//! itself stays single-writer; this cache is purely a read-side
//! convenience for callers who don't want to hold their own event loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::mesh::{EngineCommand, MeshEngine, MeshEvent};
use crate::transport::RadioAdapter;

#[derive(Default, Clone)]
struct PeerSnapshot {
    ids: Vec<String>,
    nicknames: HashMap<String, String>,
}

/// Handle to a running mesh engine plus a tap on its event stream.
pub struct App {
    commands: mpsc::Sender<EngineCommand>,
    snapshot: Arc<Mutex<PeerSnapshot>>,
    engine_task: tokio::task::JoinHandle<()>,
    event_task: tokio::task::JoinHandle<()>,
}

impl App {
    /// Start the mesh engine on `radio` and begin tracking peer events.
    /// Mirrors `start_services()` (§6).
    pub fn start_services(
        local_peer_id: String,
        nickname: String,
        radio: Box<dyn RadioAdapter>,
    ) -> (Self, mpsc::UnboundedReceiver<MeshEvent>) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (app_events_tx, app_events_rx) = mpsc::unbounded_channel();

        let engine = MeshEngine::new(local_peer_id, nickname, radio, events_tx);
        let (commands, command_rx) = mpsc::channel(64);
        let engine_task = tokio::spawn(engine.run(command_rx));

        let snapshot = Arc::new(Mutex::new(PeerSnapshot::default()));
        let snapshot_for_task = snapshot.clone();
        let event_task = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if let MeshEvent::PeerListChanged { peers, nicknames } = &event {
                    let mut snapshot = snapshot_for_task.lock().await;
                    snapshot.ids = peers.clone();
                    snapshot.nicknames = nicknames.clone();
                }
                if let MeshEvent::PeerConnected { peer_id } = &event {
                    tracing::info!(peer_id = %peer_id, "peer connected");
                }
                if app_events_tx.send(event).is_err() {
                    break;
                }
            }
        });

        (
            Self {
                commands,
                snapshot,
                engine_task,
                event_task,
            },
            app_events_rx,
        )
    }

    /// Stop the engine (`stop_services()`, §6). Both background tasks are
    /// joined so callers know teardown completed before returning.
    pub async fn stop_services(self) {
        let _ = self.commands.send(EngineCommand::Shutdown).await;
        let _ = self.engine_task.await;
        self.event_task.abort();
    }

    pub async fn set_nickname(&self, nickname: String) {
        let _ = self.commands.send(EngineCommand::SetNickname(nickname)).await;
    }

    pub async fn send_message(&self, content: String) {
        let _ = self.commands.send(EngineCommand::SendMessage(content)).await;
    }

    pub async fn connected_peer_ids(&self) -> Vec<String> {
        self.snapshot.lock().await.ids.clone()
    }

    pub async fn peer_nicknames(&self) -> HashMap<String, String> {
        self.snapshot.lock().await.nicknames.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ready_mock;

    #[tokio::test]
    async fn start_and_stop_services_round_trips_cleanly() {
        let (radio, _handle) = ready_mock(150);
        let (app, _events) = App::start_services("ffffffffffffffff".to_string(), "alice".to_string(), Box::new(radio));
        assert!(app.connected_peer_ids().await.is_empty());
        app.send_message("hello mesh".to_string()).await;
        app.stop_services().await;
    }
}
