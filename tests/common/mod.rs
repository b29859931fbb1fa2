//! Instrumented GATT transport for integration tests.
//!
//! Records every call, tracks how many operations overlap, and can hold
//! commands open on a gate or fail them on demand.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sym_ble::domain::error::{BleError, DisconnectReason};
use sym_ble::domain::models::{AppEvent, ConnectionState, DeviceHandle};
use sym_ble::infrastructure::bluetooth::catalog::CapabilityCatalog;
use sym_ble::infrastructure::bluetooth::connection::ConnectionConfig;
use sym_ble::infrastructure::bluetooth::queue::{CommandReceipt, CommandResult};
use sym_ble::infrastructure::bluetooth::simulator::{
    sym_pixl_services, CURRENT_TIME_HANDLE, TEMPERATURE_HANDLE,
};
use sym_ble::infrastructure::bluetooth::transport::{
    CharacteristicHandle, DiscoveredService, GattTransport, TransportError, TransportEvent,
};
use sym_ble::infrastructure::bluetooth::BluetoothService;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

// ── Call record ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(String),
    Disconnect,
    Discover,
    Read(CharacteristicHandle),
    Write(CharacteristicHandle, Vec<u8>),
    Subscribe(CharacteristicHandle),
}

impl TransportCall {
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Self::Read(_) | Self::Write(..) | Self::Subscribe(_)
        )
    }
}

/// Counts an operation as outstanding until dropped
struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, max_in_flight: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── MockTransport ─────────────────────────────────────────────

pub struct MockTransport {
    services: Vec<DiscoveredService>,
    calls: Mutex<Vec<TransportCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    connect_failures: AtomicU32,
    fail_writes: AtomicBool,
    lose_link_on_disconnect: AtomicBool,
    read_values: Mutex<HashMap<CharacteristicHandle, Vec<u8>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new(
        services: Vec<DiscoveredService>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let mut read_values = HashMap::new();
        read_values.insert(TEMPERATURE_HANDLE, vec![205, 0]);
        read_values.insert(
            CURRENT_TIME_HANDLE,
            vec![0xE5, 0x07, 12, 26, 18, 30, 15, 7, 0, 0],
        );

        let transport = Self {
            services,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            connect_failures: AtomicU32::new(0),
            fail_writes: AtomicBool::new(false),
            lose_link_on_disconnect: AtomicBool::new(false),
            read_values: Mutex::new(read_values),
            gate: Mutex::new(None),
            events,
        };
        (Arc::new(transport), event_rx)
    }

    pub fn sym_pixl() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        Self::new(sym_pixl_services())
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Report a link loss from inside `disconnect()`, like stacks that
    /// surface their own teardown as a callback
    pub fn lose_link_on_disconnect(&self, lose: bool) {
        self.lose_link_on_disconnect.store(lose, Ordering::SeqCst);
    }

    pub fn set_read_value(&self, handle: CharacteristicHandle, value: Vec<u8>) {
        self.read_values.lock().unwrap().insert(handle, value);
    }

    /// Hold every following operation except disconnect until released
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Let exactly one held operation through and keep holding the rest
    pub fn release_one(&self) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(1);
        }
    }

    pub fn notify(&self, handle: CharacteristicHandle, value: Vec<u8>) {
        let _ = self
            .events
            .send(TransportEvent::ValueChanged { handle, value });
    }

    pub fn drop_link(&self, reason: DisconnectReason) {
        let _ = self.events.send(TransportEvent::LinkLost { reason });
    }

    async fn operation(&self, call: TransportCall) -> InFlightGuard<'_> {
        let gated = call != TransportCall::Disconnect;
        self.calls.lock().unwrap().push(call);
        let guard = InFlightGuard::enter(&self.in_flight, &self.max_in_flight);

        let gate = if gated {
            self.gate.lock().unwrap().clone()
        } else {
            None
        };
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        // Give overlapping callers a chance to show up
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        guard
    }
}

#[async_trait]
impl GattTransport for MockTransport {
    async fn connect(&self, device: &DeviceHandle) -> Result<(), TransportError> {
        let _guard = self
            .operation(TransportCall::Connect(device.to_string()))
            .await;
        let failures = self.connect_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.connect_failures.store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::Unreachable("no answer".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let _guard = self.operation(TransportCall::Disconnect).await;
        if self.lose_link_on_disconnect.load(Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::LinkLost {
                reason: DisconnectReason::LinkLoss,
            });
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<DiscoveredService>, TransportError> {
        let _guard = self.operation(TransportCall::Discover).await;
        Ok(self.services.clone())
    }

    async fn read(&self, handle: CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        let _guard = self.operation(TransportCall::Read(handle)).await;
        let value = self.read_values.lock().unwrap().get(&handle).cloned();
        value.ok_or(TransportError::UnknownHandle(handle))
    }

    async fn write(
        &self,
        handle: CharacteristicHandle,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let _guard = self
            .operation(TransportCall::Write(handle, payload.to_vec()))
            .await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Gatt(0x0E));
        }
        Ok(())
    }

    async fn subscribe(&self, handle: CharacteristicHandle) -> Result<(), TransportError> {
        let _guard = self.operation(TransportCall::Subscribe(handle)).await;
        Ok(())
    }
}

// ── Service helpers ───────────────────────────────────────────

#[allow(dead_code)]
pub fn spawn_service<T: GattTransport>(
    transport: Arc<T>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
) -> (BluetoothService, mpsc::UnboundedReceiver<AppEvent>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let service = BluetoothService::spawn(
        transport,
        events,
        CapabilityCatalog::sym_pixl(),
        ConnectionConfig {
            connect_retries: 1,
            retry_delay_ms: 1,
        },
        event_tx,
    );
    (service, event_rx)
}

#[allow(dead_code)]
pub async fn wait_for_state(service: &BluetoothService, state: ConnectionState) {
    let mut session = service.observe().watch_session();
    timeout(STEP_TIMEOUT, session.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
        .expect("service stopped");
}

/// Connect and wait until the bootstrap read of the temperature has landed
#[allow(dead_code)]
pub async fn connect_ready(service: &BluetoothService) {
    service.connect(DeviceHandle::new("pixl"));
    wait_for_state(service, ConnectionState::Ready).await;
    let mut temperature = service.observe().watch_temperature();
    timeout(STEP_TIMEOUT, temperature.wait_for(|t| t.is_some()))
        .await
        .expect("timed out waiting for bootstrap")
        .expect("service stopped");
}

/// Next error published on the event stream
#[allow(dead_code)]
pub async fn next_error(events: &mut mpsc::UnboundedReceiver<AppEvent>) -> BleError {
    loop {
        let event = timeout(STEP_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for an error")
            .expect("event stream closed");
        if let AppEvent::Error(e) = event {
            return e;
        }
    }
}

#[allow(dead_code)]
pub async fn settle(receipt: CommandReceipt) -> CommandResult {
    timeout(STEP_TIMEOUT, receipt)
        .await
        .expect("timed out waiting for command")
}
