//! The mesh engine: single-writer orchestrator of receive, dedup,
//! dispatch, relay, and the announce/scan lifecycles (§4.H, §5).
//!
//! One task owns `MeshEngine`. Everything that can mutate its state
//! arrives as an [`EngineCommand`] or a [`RadioEvent`]; there is no other
//! entry point, and no field is ever shared behind a lock. This is the
//! one place this crate deliberately departs from the teacher's usual
//! `Arc<RwLock<_>>`-per-field style, because the protocol here demands
//! strict per-source event ordering that a lock-per-field can't give you
//! for free.

pub mod dedup;
pub mod error;
pub mod events;
pub mod peer;
pub mod scanner;

pub use error::EngineError;
pub use events::MeshEvent;

use std::pin::Pin;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{self, Interval, Sleep};

use crate::protocol::constants::{
    ANNOUNCE_MIN_INTERVAL, CONNECT_TIMEOUT, DEDUP_MAX_FRAGMENTS, DEDUP_MAX_PACKETS,
    DEDUP_WINDOW_FRAGMENTS, DEDUP_WINDOW_PACKETS, DEFAULT_FRAGMENT_SIZE,
    FRAGMENT_SENT_ECHO_WINDOW, MAINTENANCE_INTERVAL, MESSAGE_TTL_DEFAULT, PACKET_TYPE_ANNOUNCE,
    PACKET_TYPE_FRAGMENT, PACKET_TYPE_MESSAGE, PEER_INACTIVITY_TIMEOUT,
    PERIODIC_ANNOUNCE_INTERVAL, POST_CONNECT_ANNOUNCE_DELAY, RECIPROCAL_ANNOUNCE_DELAY,
    RELAY_JITTER_MAX_MS, RELAY_JITTER_MIN_MS,
};
use crate::protocol::fragment::{self, FragmentChunk, Reassembler, ReassemblyOutcome};
use crate::protocol::{announce, codec, NodeId, Packet, PacketKind};
use crate::transport::{AdapterState, DeviceId, RadioAdapter, RadioEvent, WriteMode};

use dedup::Deduplicator;
use peer::PeerMap;
use scanner::{AdaptiveScanner, ScanState};

/// Commands the upper layer sends into the engine (§6 upper-layer API).
pub enum EngineCommand {
    SetNickname(String),
    SendMessage(String),
    Shutdown,
}

/// Placeholder deadline for the scan-cycle timer while the scanner is
/// Aggressive (no cycling): long enough it will never fire in practice,
/// and the select branch is gated off by `scan_cycling` regardless.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

struct AnnounceClock {
    last_sent: Option<Instant>,
}

impl AnnounceClock {
    fn ready(&self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) => now.duration_since(last) >= ANNOUNCE_MIN_INTERVAL,
            None => true,
        }
    }

    fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}

/// Owns every piece of mutable mesh state (§5): deduplicators, peer map,
/// link state (inside the radio adapter's companion [`crate::transport::link_manager::LinkManager`]
/// is owned by the caller and passed in), reassembly slots, announce
/// clock, and traffic trace (inside [`AdaptiveScanner`]).
pub struct MeshEngine {
    local_peer_id: String,
    nickname: String,
    radio: Box<dyn RadioAdapter>,
    links: crate::transport::link_manager::LinkManager,
    peers: PeerMap,
    packet_dedup: Deduplicator,
    fragment_dedup: Deduplicator,
    sent_fragments: Deduplicator,
    reassembler: Reassembler,
    scanner: AdaptiveScanner,
    events_tx: mpsc::UnboundedSender<MeshEvent>,
    central_ready: bool,
    peripheral_ready: bool,
    announced_once: bool,
    announce_clock: AnnounceClock,
    device_to_peer: std::collections::HashMap<DeviceId, String>,
    /// Drives the Cycled scan-on/scan-off alternation (§4.G). Disarmed
    /// (gated off in `run`'s select) while the scanner is Aggressive.
    scan_timer: Pin<Box<Sleep>>,
    scan_cycling: bool,
    scan_on: bool,
}

impl MeshEngine {
    pub fn new(
        local_peer_id: String,
        nickname: String,
        radio: Box<dyn RadioAdapter>,
        events_tx: mpsc::UnboundedSender<MeshEvent>,
    ) -> Self {
        Self {
            local_peer_id,
            nickname,
            radio,
            links: crate::transport::link_manager::LinkManager::new(DEFAULT_FRAGMENT_SIZE),
            peers: PeerMap::new(),
            packet_dedup: Deduplicator::new(DEDUP_WINDOW_PACKETS, DEDUP_MAX_PACKETS),
            fragment_dedup: Deduplicator::new(DEDUP_WINDOW_FRAGMENTS, DEDUP_MAX_FRAGMENTS),
            sent_fragments: Deduplicator::new(FRAGMENT_SENT_ECHO_WINDOW, DEDUP_MAX_FRAGMENTS),
            reassembler: Reassembler::new(),
            scanner: AdaptiveScanner::new(),
            events_tx,
            central_ready: false,
            peripheral_ready: false,
            announced_once: false,
            announce_clock: AnnounceClock { last_sent: None },
            device_to_peer: std::collections::HashMap::new(),
            scan_timer: Box::pin(time::sleep(FAR_FUTURE)),
            scan_cycling: false,
            scan_on: true,
        }
    }

    /// Drive the engine until `commands` closes or a [`EngineCommand::Shutdown`]
    /// arrives. This is the single task mandated by §5.
    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        let mut maintenance: Interval = time::interval(MAINTENANCE_INTERVAL);
        let mut periodic_announce: Interval = time::interval(PERIODIC_ANNOUNCE_INTERVAL);

        // Both radio roles come up scanning/advertising immediately: zero
        // connections means Aggressive (continuous scan) per §4.G, and the
        // responder role always advertises while the engine is running.
        let _ = self.radio.start_advertising().await;
        let _ = self.radio.start_scan().await;

        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(EngineCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                event = self.radio.next_event() => {
                    match event {
                        Some(event) => self.handle_radio_event(event).await,
                        None => break,
                    }
                }
                _ = maintenance.tick() => self.run_maintenance().await,
                _ = periodic_announce.tick() => self.maybe_periodic_announce().await,
                () = self.scan_timer.as_mut(), if self.scan_cycling => self.on_scan_timer_fire().await,
            }
        }

        let _ = self.radio.stop_scan().await;
        let _ = self.radio.stop_advertising().await;
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::SetNickname(nickname) => {
                self.nickname = nickname;
                self.send_announce().await;
            }
            EngineCommand::SendMessage(content) => {
                self.broadcast_message(content).await;
            }
            EngineCommand::Shutdown => {}
        }
    }

    async fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::CentralState(state) => {
                self.central_ready = state == AdapterState::PoweredOn;
                self.maybe_settle_announce().await;
            }
            RadioEvent::PeripheralState(state) => {
                self.peripheral_ready = state == AdapterState::PoweredOn;
                self.maybe_settle_announce().await;
            }
            RadioEvent::Discovered { device, rssi, connectable } => {
                self.on_discovered(device, rssi, connectable).await;
            }
            RadioEvent::Connected { device } => {
                self.on_connected(device).await;
            }
            RadioEvent::ConnectFailed { device, .. } => {
                self.on_link_dropped(device).await;
            }
            RadioEvent::Disconnected { device, .. } => {
                self.on_link_dropped(device).await;
            }
            RadioEvent::ServiceDiscovered { .. } | RadioEvent::CharacteristicDiscovered { .. } => {}
            RadioEvent::NotificationReceived { device, data } => {
                self.on_inbound_bytes(data, device).await;
            }
            RadioEvent::WriteReceived { central, data } => {
                self.on_inbound_bytes(data, central).await;
            }
            RadioEvent::Subscribed { central } => self.links.subscribe(central),
            RadioEvent::Unsubscribed { central } => self.links.unsubscribe(&central),
            RadioEvent::ReadyToUpdateSubscribers => self.flush_pending().await,
        }
    }

    async fn maybe_settle_announce(&mut self) {
        if self.central_ready && self.peripheral_ready && !self.announced_once {
            self.announced_once = true;
            time::sleep(POST_CONNECT_ANNOUNCE_DELAY).await;
            self.send_announce().await;
        }
    }

    async fn on_discovered(&mut self, device: DeviceId, rssi: i16, connectable: bool) {
        // §7 RadioUnavailable: defer outbound connect attempts until the
        // central role is confirmed powered-on.
        if !self.central_ready {
            return;
        }
        let now = Instant::now();
        if self
            .links
            .evaluate_connect(&self.local_peer_id, &device, rssi, connectable, now)
            .is_ok()
        {
            self.links.begin_connecting(device.clone(), now);
            let _ = self.radio.connect(&device).await;
        }
    }

    async fn on_connected(&mut self, device: DeviceId) {
        let max_write = self.radio.max_write_length(&device).await.unwrap_or(DEFAULT_FRAGMENT_SIZE);
        self.links.mark_connected(&device, max_write);
        let _ = self.radio.discover_service_and_characteristic(&device).await;
        self.recompute_scanner().await;
        time::sleep(POST_CONNECT_ANNOUNCE_DELAY).await;
        self.send_announce().await;
    }

    async fn on_link_dropped(&mut self, device: DeviceId) {
        if let Some(peer_id) = self.links.remove_outbound(&device) {
            self.forget_peer(&peer_id).await;
        }
        self.recompute_scanner().await;
    }

    async fn forget_peer(&mut self, peer_id: &str) {
        if self.peers.remove(peer_id).is_some() {
            self.device_to_peer.retain(|_, bound| bound != peer_id);
            let _ = self.events_tx.send(MeshEvent::PeerDisconnected { peer_id: peer_id.to_string() });
            self.emit_peer_list_changed();
        }
    }

    fn emit_peer_list_changed(&self) {
        let _ = self.events_tx.send(MeshEvent::PeerListChanged {
            peers: self.peers.ids(),
            nicknames: self.peers.nicknames(),
        });
    }

    async fn on_inbound_bytes(&mut self, bytes: Vec<u8>, source: DeviceId) {
        self.scanner.record_packet(Instant::now());
        self.recompute_scanner().await;

        let packet = match codec::decode(&bytes) {
            Ok(packet) => packet,
            Err(_) => return,
        };

        let Some(kind) = packet.kind() else { return };

        if kind != PacketKind::Fragment {
            if self.packet_dedup.is_duplicate(&packet.dedup_id()) {
                return;
            }
        }

        match kind {
            PacketKind::Announce => self.handle_announce(packet, source).await,
            PacketKind::Message => self.handle_message(packet).await,
            PacketKind::Fragment => self.handle_fragment(packet, source).await,
            PacketKind::Leave => self.handle_leave(packet).await,
        }
    }

    async fn handle_announce(&mut self, packet: Packet, source: DeviceId) {
        let Ok(parsed) = announce::decode(&packet.payload) else { return };
        let first_binding = self.peers.upsert(&parsed.peer_id, parsed.nickname);

        self.device_to_peer.insert(source.clone(), parsed.peer_id.clone());
        self.links.bind_peer_id(&source, parsed.peer_id.clone());

        if first_binding {
            let _ = self.events_tx.send(MeshEvent::PeerConnected { peer_id: parsed.peer_id });
        }
        self.emit_peer_list_changed();

        time::sleep(RECIPROCAL_ANNOUNCE_DELAY).await;
        self.send_announce().await;

        self.relay(packet).await;
    }

    async fn handle_message(&mut self, packet: Packet) {
        if packet.sender_id == self.local_device_id() {
            return;
        }
        let Ok(content) = String::from_utf8(packet.payload.clone()) else { return };
        let sender_peer_id = hex::encode(packet.sender_id);
        let nickname = self.peers.nickname_or_anon(&sender_peer_id);

        let _ = self.events_tx.send(MeshEvent::PublicMessage {
            from_peer_id: sender_peer_id,
            nickname,
            content,
            timestamp_ms: packet.timestamp_ms,
        });

        self.relay(packet).await;
    }

    async fn handle_fragment(&mut self, packet: Packet, source: DeviceId) {
        let Some(chunk) = FragmentChunk::decode_payload(&packet.payload) else {
            return;
        };

        if self.sent_fragments.is_duplicate(&hex::encode(chunk.fragment_id)) {
            // our own fragment, reflected back by a relay peer
            return;
        }

        if self.fragment_dedup.is_duplicate(&chunk.dedup_key(&packet.sender_id)) {
            return;
        }

        if packet.ttl > 1 {
            self.relay_fragment_raw(&packet).await;
        }

        if let ReassemblyOutcome::Complete { encoded } = self.reassembler.accept(packet.sender_id, chunk) {
            // Re-enter the normal receive path with the reassembled wire
            // bytes, exactly as if they'd arrived whole in one write or
            // notification (§3 fragment payload invariant): this is what
            // lets compression and flags (§4.A) survive reassembly, since
            // it's the encoded packet that was fragmented, not the raw
            // payload. Boxed because this mutually recurses with
            // `on_inbound_bytes` through the type checker even though the
            // reassembled packet itself is never type-Fragment again.
            Box::pin(self.on_inbound_bytes(encoded, source)).await;
        }
    }

    async fn handle_leave(&mut self, packet: Packet) {
        let peer_id = hex::encode(packet.sender_id);
        if let Some(device) = self.links.connected_device_for_peer(&peer_id) {
            let _ = self.radio.cancel_connect(&device).await;
            self.links.remove_outbound(&device);
        }
        self.forget_peer(&peer_id).await;
        self.relay(packet).await;
    }

    fn local_device_id(&self) -> NodeId {
        let mut id = [0u8; 8];
        let bytes = hex::decode(&self.local_peer_id).unwrap_or_default();
        let len = bytes.len().min(8);
        id[..len].copy_from_slice(&bytes[..len]);
        id
    }

    /// Relay decision for non-Fragment packets (§4.H step 5).
    async fn relay(&mut self, packet: Packet) {
        if packet.ttl <= 1 {
            return;
        }

        let connected = self.links.connected_count();
        let should_relay = if connected <= 2 {
            true
        } else if connected > 5 {
            let probability = if packet.kind() == Some(PacketKind::Announce) { 0.3 } else { 0.5 };
            rand::thread_rng().gen_bool(probability)
        } else {
            true
        };

        if !should_relay {
            return;
        }

        let jitter = Duration::from_millis(rand::thread_rng().gen_range(RELAY_JITTER_MIN_MS..=RELAY_JITTER_MAX_MS));
        time::sleep(jitter).await;

        let relayed = packet.decrement_ttl();
        self.write_packet(&relayed).await;
    }

    /// Fragment relay preserves the fragmented transport: a fragment is
    /// forwarded raw, never reassembled-then-re-split (§4.E).
    async fn relay_fragment_raw(&mut self, packet: &Packet) {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(RELAY_JITTER_MIN_MS..=RELAY_JITTER_MAX_MS));
        time::sleep(jitter).await;
        let relayed = packet.decrement_ttl();
        self.write_packet(&relayed).await;
    }

    async fn broadcast_message(&mut self, content: String) {
        let packet = Packet::new(
            PACKET_TYPE_MESSAGE,
            MESSAGE_TTL_DEFAULT,
            now_ms(),
            self.local_device_id(),
            content.into_bytes(),
        );
        self.write_packet(&packet).await;
    }

    async fn send_announce(&mut self) {
        let now = Instant::now();
        if !self.announce_clock.ready(now) {
            return;
        }
        let Ok(payload) = announce::encode(&announce::AnnouncePayload {
            nickname: self.nickname.clone(),
            peer_id: self.local_peer_id.clone(),
        }) else {
            return;
        };
        let packet = Packet::new(PACKET_TYPE_ANNOUNCE, MESSAGE_TTL_DEFAULT, now_ms(), self.local_device_id(), payload);
        self.announce_clock.mark_sent(now);
        self.write_packet(&packet).await;
    }

    async fn maybe_periodic_announce(&mut self) {
        if self.links.connected_count() > 0 || self.links.subscriber_count() > 0 {
            self.send_announce().await;
        }
    }

    /// Single broadcast entry point (§4.H "Broadcast path"): encode,
    /// decide fragmentation, pre-mark our own id so a reflected relay
    /// can't loop back to us, then fan out to every live link.
    async fn write_packet(&mut self, packet: &Packet) {
        let Ok(encoded) = codec::encode(packet, false) else { return };

        self.packet_dedup.is_duplicate(&packet.dedup_id()); // pre-mark, result unused

        if encoded.len() <= DEFAULT_FRAGMENT_SIZE {
            self.fan_out(encoded).await;
            return;
        }

        // §3/§8 invariant 4: fragment the already-encoded wire bytes, not
        // the raw payload, so concatenating chunks in index order and
        // decoding yields back this exact packet, compression and flags
        // included.
        let effective_write_len = self.links.effective_write_length();
        let chunks = fragment::split(&encoded, effective_write_len, &mut rand::thread_rng());
        if let Some(first) = chunks.first() {
            self.sent_fragments.is_duplicate(&hex::encode(first.fragment_id));
        }

        let total = chunks.len() as u16;
        for chunk in chunks {
            let fragment_packet = Packet {
                version: crate::protocol::constants::PROTOCOL_VERSION,
                packet_type: PACKET_TYPE_FRAGMENT,
                ttl: packet.ttl,
                timestamp_ms: packet.timestamp_ms,
                sender_id: packet.sender_id,
                recipient_id: packet.recipient_id,
                payload: chunk.encode_payload(),
            };
            if let Ok(encoded_fragment) = codec::encode(&fragment_packet, false) {
                self.fan_out(encoded_fragment).await;
            }
            time::sleep(fragment::pace_delay(total)).await;
        }
    }

    async fn fan_out(&mut self, bytes: Vec<u8>) {
        // §7 RadioUnavailable: the engine fans out only to the roles
        // currently confirmed powered-on; an unready role's subscribers get
        // nothing until it reports PoweredOn (no silent partial failure to
        // surface, since the role genuinely cannot accept writes yet).
        if self.central_ready {
            let devices: Vec<DeviceId> = self.links.connected_devices().cloned().collect();
            for device in devices {
                let _ = self.radio.write(&device, bytes.clone(), WriteMode::WithoutResponse).await;
            }
        }
        if self.peripheral_ready && self.radio.publish_notification(bytes.clone(), None).await.is_err() {
            if let Some(_dropped) = self.links.enqueue_pending(bytes, None) {
                tracing::warn!("pending notification queue saturated, dropped oldest broadcast");
            }
        }
    }

    async fn flush_pending(&mut self) {
        for (data, subscribers) in self.links.drain_pending() {
            let _ = self.radio.publish_notification(data, subscribers).await;
        }
    }

    /// Re-derive the scanner's mode and, on a change, (re)drive the radio
    /// and the scan-on/off cycle timer to match (§4.G).
    async fn recompute_scanner(&mut self) {
        let decision = self.scanner.recompute(self.links.connected_count(), Instant::now());
        if !decision.changed {
            return;
        }
        match decision.state {
            ScanState::Aggressive => {
                self.scan_cycling = false;
                let _ = self.radio.start_scan().await;
            }
            ScanState::Cycled(mode) => {
                self.scan_on = true;
                self.scan_cycling = true;
                let _ = self.radio.start_scan().await;
                self.arm_scan_timer(mode.cycle().0);
            }
        }
    }

    /// The scan-on/off half of the current cycle has elapsed: flip phase,
    /// tell the radio, and arm the timer for the other half.
    async fn on_scan_timer_fire(&mut self) {
        let ScanState::Cycled(mode) = self.scanner.state() else {
            self.scan_cycling = false;
            return;
        };
        self.scan_on = !self.scan_on;
        let (on, off) = mode.cycle();
        if self.scan_on {
            let _ = self.radio.start_scan().await;
            self.arm_scan_timer(on);
        } else {
            let _ = self.radio.stop_scan().await;
            self.arm_scan_timer(off);
        }
    }

    fn arm_scan_timer(&mut self, delay: Duration) {
        self.scan_timer.as_mut().reset(time::Instant::now() + delay);
    }

    async fn run_maintenance(&mut self) {
        let now = Instant::now();

        let timed_out = self.links.timed_out_connecting(CONNECT_TIMEOUT, now);
        for device in timed_out {
            tracing::debug!(device = %device, "connect attempt timed out");
            let _ = self.radio.cancel_connect(&device).await;
            self.links.remove_outbound(&device);
        }

        let stale = self.links.stale_outbound(PEER_INACTIVITY_TIMEOUT, now);
        for device in stale {
            if let Some(peer_id) = self.links.remove_outbound(&device) {
                self.forget_peer(&peer_id).await;
            }
        }
        self.reassembler.sweep_expired();
        self.recompute_scanner().await;
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{ready_mock, MockRadioHandle};

    fn spawn_engine() -> (mpsc::Sender<EngineCommand>, mpsc::UnboundedReceiver<MeshEvent>, MockRadioHandle, tokio::task::JoinHandle<()>) {
        let (radio, mock_handle) = ready_mock(150);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = MeshEngine::new("ffffffffffffffff".to_string(), "alice".to_string(), Box::new(radio), events_tx);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let handle = tokio::spawn(engine.run(cmd_rx));
        (cmd_tx, events_rx, mock_handle, handle)
    }

    #[tokio::test]
    async fn send_message_does_not_panic_with_no_links() {
        let (cmd_tx, _events_rx, _mock, handle) = spawn_engine();
        cmd_tx.send(EngineCommand::SendMessage("hi".to_string())).await.unwrap();
        cmd_tx.send(EngineCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn set_nickname_triggers_an_announce_attempt() {
        let (cmd_tx, _events_rx, _mock, handle) = spawn_engine();
        cmd_tx.send(EngineCommand::SetNickname("bob".to_string())).await.unwrap();
        cmd_tx.send(EngineCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }

    /// §4.G: with zero connections the engine must be scanning continuously
    /// from the moment it starts, not only after some later transition.
    #[tokio::test]
    async fn engine_starts_scanning_immediately_on_boot() {
        let (cmd_tx, _events_rx, mock, handle) = spawn_engine();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mock.scan_calls.lock().await.contains(&true), "start_scan must be called at boot");
        cmd_tx.send(EngineCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }
}
