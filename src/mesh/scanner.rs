//! Adaptive duty-cycle scanner (§4.G).
//!
//! With no direct connections the scanner stays Aggressive (continuous
//! scan, duplicates allowed). Once at least one connection exists it
//! cycles scan-on/scan-off per a mode chosen from recent traffic and
//! connection count. The scanner itself only decides *which* intervals
//! apply; starting/stopping the actual radio scan and (re)arming the
//! cycle timer is the engine's job, driven by [`ScanDecision`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::constants::{SCAN_CYCLE_DENSE, SCAN_CYCLE_NORMAL, SCAN_CYCLE_SPARSE, TRAFFIC_TRACE_WINDOW};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Normal,
    Dense,
    Sparse,
}

impl ScanMode {
    pub fn cycle(self) -> (Duration, Duration) {
        match self {
            ScanMode::Normal => SCAN_CYCLE_NORMAL,
            ScanMode::Dense => SCAN_CYCLE_DENSE,
            ScanMode::Sparse => SCAN_CYCLE_SPARSE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Aggressive,
    Cycled(ScanMode),
}

/// Outcome of a recompute: whether the scanner's state changed, and if
/// so, the cycle the engine should (re)arm its timer with. `None` means
/// "no visible change, leave the current scan/timer running".
pub struct ScanDecision {
    pub state: ScanState,
    pub changed: bool,
}

pub struct AdaptiveScanner {
    state: ScanState,
    traffic: VecDeque<Instant>,
}

impl AdaptiveScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Aggressive,
            traffic: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Record one inbound packet's arrival. Call before [`recompute`] so
    /// the new packet is counted in this round's traffic window.
    pub fn record_packet(&mut self, at: Instant) {
        self.traffic.push_back(at);
    }

    fn recent_packet_count(&mut self, now: Instant) -> usize {
        while let Some(&front) = self.traffic.front() {
            if now.duration_since(front) > TRAFFIC_TRACE_WINDOW {
                self.traffic.pop_front();
            } else {
                break;
            }
        }
        self.traffic.len()
    }

    /// Recompute scan state from current traffic and connection count
    /// (§4.G). Called every time the engine observes a new received
    /// packet.
    pub fn recompute(&mut self, direct_connections: usize, now: Instant) -> ScanDecision {
        if direct_connections == 0 {
            let changed = self.state != ScanState::Aggressive;
            self.state = ScanState::Aggressive;
            return ScanDecision { state: self.state, changed };
        }

        let recent = self.recent_packet_count(now);
        let mode = if recent > 10 || direct_connections > 5 {
            ScanMode::Dense
        } else if recent < 2 && direct_connections < 2 {
            ScanMode::Sparse
        } else {
            ScanMode::Normal
        };

        let next_state = ScanState::Cycled(mode);
        let changed = self.state != next_state;
        self.state = next_state;
        ScanDecision { state: self.state, changed }
    }
}

impl Default for AdaptiveScanner {
    fn default() -> Self {
        Self::new()
    }
}
