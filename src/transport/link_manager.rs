//! Outbound (initiator) and inbound (responder) link state (§4.F).
//!
//! Both roles share one `LinkManager` because they observe and gate each
//! other: the responder's subscriber set feeds `effective_write_length`
//! just as much as the initiator's outbound links do, and the tie-break
//! rule exists specifically so the two roles on two different devices
//! don't both win the race to connect.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::identity::derive_candidate_peer_id;
use crate::protocol::constants::{CONNECT_RATE_LIMIT, MAX_OUTBOUND_LINKS, PENDING_NOTIFICATION_CAP, RSSI_CUTOFF_DBM};
use crate::transport::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundLinkState {
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct OutboundLink {
    pub state: OutboundLinkState,
    pub peer_id: Option<String>,
    pub attempted_at: Instant,
    pub max_write_len: Option<usize>,
}

/// Reasons an initiator-role connect attempt is rejected before it ever
/// reaches the OS (§4.F, initiator steps 1-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRejection {
    TooManyOutboundLinks,
    RateLimited,
    RssiTooLow,
    NotConnectable,
    LosesTieBreak,
}

pub struct LinkManager {
    outbound: HashMap<DeviceId, OutboundLink>,
    subscribers: Vec<DeviceId>,
    last_connect_attempt: Option<Instant>,
    pending: VecDeque<(Vec<u8>, Option<Vec<DeviceId>>)>,
    default_fragment_size: usize,
}

impl LinkManager {
    pub fn new(default_fragment_size: usize) -> Self {
        Self {
            outbound: HashMap::new(),
            subscribers: Vec::new(),
            last_connect_attempt: None,
            pending: VecDeque::new(),
            default_fragment_size,
        }
    }

    /// Run the initiator-role admission checks (§4.F steps 1-4) against a
    /// freshly discovered device. Does not mutate state; call
    /// [`begin_connecting`] separately once the caller decides to proceed.
    pub fn evaluate_connect(
        &self,
        local_peer_id: &str,
        device: &DeviceId,
        rssi: i16,
        connectable: bool,
        now: Instant,
    ) -> Result<(), ConnectRejection> {
        let active_outbound = self
            .outbound
            .values()
            .filter(|link| matches!(link.state, OutboundLinkState::Connecting | OutboundLinkState::Connected))
            .count();
        if active_outbound >= MAX_OUTBOUND_LINKS {
            return Err(ConnectRejection::TooManyOutboundLinks);
        }

        if let Some(last) = self.last_connect_attempt {
            if now.duration_since(last) < CONNECT_RATE_LIMIT {
                return Err(ConnectRejection::RateLimited);
            }
        }

        if rssi <= RSSI_CUTOFF_DBM {
            return Err(ConnectRejection::RssiTooLow);
        }
        if !connectable {
            return Err(ConnectRejection::NotConnectable);
        }

        let candidate_id = derive_candidate_peer_id(device.as_bytes());
        if local_peer_id <= candidate_id.as_str() {
            return Err(ConnectRejection::LosesTieBreak);
        }

        Ok(())
    }

    pub fn begin_connecting(&mut self, device: DeviceId, now: Instant) {
        self.last_connect_attempt = Some(now);
        self.outbound.insert(
            device,
            OutboundLink {
                state: OutboundLinkState::Connecting,
                peer_id: None,
                attempted_at: now,
                max_write_len: None,
            },
        );
    }

    pub fn mark_connected(&mut self, device: &DeviceId, max_write_len: usize) {
        if let Some(link) = self.outbound.get_mut(device) {
            link.state = OutboundLinkState::Connected;
            link.max_write_len = Some(max_write_len);
        }
    }

    pub fn bind_peer_id(&mut self, device: &DeviceId, peer_id: String) {
        if let Some(link) = self.outbound.get_mut(device) {
            link.peer_id = Some(peer_id);
        }
    }

    /// Remove the outbound link for `device`, returning its bound
    /// `peer_id` if one existed (§4.F: "if a peer_id was bound, also
    /// forget its nickname and emit a disconnect event").
    pub fn remove_outbound(&mut self, device: &DeviceId) -> Option<String> {
        self.outbound.remove(device).and_then(|link| link.peer_id)
    }

    pub fn outbound_peer_id(&self, device: &DeviceId) -> Option<&str> {
        self.outbound.get(device).and_then(|link| link.peer_id.as_deref())
    }

    pub fn connected_device_for_peer(&self, peer_id: &str) -> Option<DeviceId> {
        self.outbound
            .iter()
            .find(|(_, link)| link.peer_id.as_deref() == Some(peer_id) && link.state == OutboundLinkState::Connected)
            .map(|(device, _)| device.clone())
    }

    pub fn connected_devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.outbound
            .iter()
            .filter(|(_, link)| link.state == OutboundLinkState::Connected)
            .map(|(device, _)| device)
    }

    pub fn connected_count(&self) -> usize {
        self.connected_devices().count()
    }

    /// Outbound links that are neither Connected nor Connecting and whose
    /// last attempt is older than `idle_after` (maintenance sweep, §4.H).
    pub fn stale_outbound(&self, idle_after: Duration, now: Instant) -> Vec<DeviceId> {
        self.outbound
            .iter()
            .filter(|(_, link)| now.duration_since(link.attempted_at) >= idle_after)
            .filter(|(_, link)| link.state != OutboundLinkState::Connected)
            .map(|(device, _)| device.clone())
            .collect()
    }

    /// Outbound links still stuck `Connecting` past `connect_timeout` (§5
    /// "connect attempts time out at connect_timeout_s"). Distinct from
    /// [`stale_outbound`], which also covers links that never progress
    /// past a failed attempt and uses the longer inactivity window.
    pub fn timed_out_connecting(&self, connect_timeout: Duration, now: Instant) -> Vec<DeviceId> {
        self.outbound
            .iter()
            .filter(|(_, link)| link.state == OutboundLinkState::Connecting)
            .filter(|(_, link)| now.duration_since(link.attempted_at) >= connect_timeout)
            .map(|(device, _)| device.clone())
            .collect()
    }

    pub fn subscribe(&mut self, central: DeviceId) {
        if !self.subscribers.contains(&central) {
            self.subscribers.push(central);
        }
    }

    pub fn unsubscribe(&mut self, central: &DeviceId) {
        self.subscribers.retain(|c| c != central);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Minimum advertised max-write-without-response length across
    /// Connected outbound links, clamped by `default_fragment_size`; the
    /// configured default if nothing is connected (§4.F).
    pub fn effective_write_length(&self) -> usize {
        let min_connected = self
            .connected_devices()
            .filter_map(|device| self.outbound.get(device))
            .filter_map(|link| link.max_write_len)
            .min();

        match min_connected {
            Some(len) => len.min(self.default_fragment_size),
            None => self.default_fragment_size,
        }
    }

    /// Queue a broadcast the OS couldn't immediately accept. Drops the
    /// oldest entry once `PENDING_NOTIFICATION_CAP` is exceeded, returning
    /// whatever got dropped so the caller can log a `BackpressureDrop`.
    pub fn enqueue_pending(&mut self, data: Vec<u8>, subscribers: Option<Vec<DeviceId>>) -> Option<(Vec<u8>, Option<Vec<DeviceId>>)> {
        self.pending.push_back((data, subscribers));
        if self.pending.len() > PENDING_NOTIFICATION_CAP {
            self.pending.pop_front()
        } else {
            None
        }
    }

    pub fn drain_pending(&mut self) -> Vec<(Vec<u8>, Option<Vec<DeviceId>>)> {
        self.pending.drain(..).collect()
    }
}
