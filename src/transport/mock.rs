//! In-memory [`RadioAdapter`] used by integration tests (§8, scenarios S4-S6).
//!
//! Two `MockRadio` handles can be wired to each other via
//! [`mock_pair`] so tests can exercise the link manager and mesh engine
//! end-to-end without a real BLE stack.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use async_trait::async_trait;

use super::{AdapterState, DeviceId, LinkError, RadioAdapter, RadioEvent, WriteMode};

/// Shared control surface a test holds onto to inject events and observe
/// writes the engine performed through the adapter.
pub struct MockRadioHandle {
    pub events: mpsc::UnboundedSender<RadioEvent>,
    pub writes: Arc<Mutex<Vec<(DeviceId, Vec<u8>, WriteMode)>>>,
    pub broadcasts: Arc<Mutex<Vec<Vec<u8>>>>,
    /// `true` for a `start_scan` call, `false` for `stop_scan`, in order.
    pub scan_calls: Arc<Mutex<Vec<bool>>>,
    /// Devices the engine attempted an outbound `connect()` against, in order.
    pub connects: Arc<Mutex<Vec<DeviceId>>>,
}

pub struct MockRadio {
    events_rx: Mutex<mpsc::UnboundedReceiver<RadioEvent>>,
    writes: Arc<Mutex<Vec<(DeviceId, Vec<u8>, WriteMode)>>>,
    broadcasts: Arc<Mutex<Vec<Vec<u8>>>>,
    scan_calls: Arc<Mutex<Vec<bool>>>,
    connects: Arc<Mutex<Vec<DeviceId>>>,
    max_write_len: usize,
}

impl MockRadio {
    pub fn new(max_write_len: usize) -> (Self, MockRadioHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writes = Arc::new(Mutex::new(Vec::new()));
        let broadcasts = Arc::new(Mutex::new(Vec::new()));
        let scan_calls = Arc::new(Mutex::new(Vec::new()));
        let connects = Arc::new(Mutex::new(Vec::new()));
        let adapter = Self {
            events_rx: Mutex::new(rx),
            writes: writes.clone(),
            broadcasts: broadcasts.clone(),
            scan_calls: scan_calls.clone(),
            connects: connects.clone(),
            max_write_len,
        };
        let handle = MockRadioHandle {
            events: tx,
            writes,
            broadcasts,
            scan_calls,
            connects,
        };
        (adapter, handle)
    }
}

#[async_trait]
impl RadioAdapter for MockRadio {
    async fn start_scan(&self) -> Result<(), LinkError> {
        self.scan_calls.lock().await.push(true);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), LinkError> {
        self.scan_calls.lock().await.push(false);
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<(), LinkError> {
        self.connects.lock().await.push(device.clone());
        Ok(())
    }

    async fn cancel_connect(&self, _device: &DeviceId) -> Result<(), LinkError> {
        Ok(())
    }

    async fn discover_service_and_characteristic(&self, _device: &DeviceId) -> Result<(), LinkError> {
        Ok(())
    }

    async fn write(&self, device: &DeviceId, data: Vec<u8>, mode: WriteMode) -> Result<(), LinkError> {
        self.writes.lock().await.push((device.clone(), data, mode));
        Ok(())
    }

    async fn max_write_length(&self, _device: &DeviceId) -> Result<usize, LinkError> {
        Ok(self.max_write_len)
    }

    async fn start_advertising(&self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), LinkError> {
        Ok(())
    }

    async fn publish_notification(&self, data: Vec<u8>, _subscribers: Option<Vec<DeviceId>>) -> Result<(), LinkError> {
        self.broadcasts.lock().await.push(data);
        Ok(())
    }

    async fn next_event(&self) -> Option<RadioEvent> {
        self.events_rx.lock().await.recv().await
    }
}

/// Convenience constructor that immediately pushes a powered-on state for
/// both roles, since nearly every test wants to skip past that.
pub fn ready_mock(max_write_len: usize) -> (MockRadio, MockRadioHandle) {
    let (adapter, handle) = MockRadio::new(max_write_len);
    let _ = handle.events.send(RadioEvent::CentralState(AdapterState::PoweredOn));
    let _ = handle.events.send(RadioEvent::PeripheralState(AdapterState::PoweredOn));
    (adapter, handle)
}
