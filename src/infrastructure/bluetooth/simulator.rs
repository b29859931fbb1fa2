//! Simulated SYM Pixl Peripheral
//!
//! In-memory GATT server with the services and characteristics of the SYM
//! Pixl board. Drives the demo binary and the tests; link loss, button
//! presses and clock ticks are injected through its methods.

use crate::domain::error::DisconnectReason;
use crate::domain::models::{Attribute, CurrentTime, DeviceHandle, Operation, Operations};
use crate::infrastructure::bluetooth::catalog::CapabilityCatalog;
use crate::infrastructure::bluetooth::protocol::{self, CURRENT_TIME_LEN, INTEGER_LEN};
use crate::infrastructure::bluetooth::transport::{
    CharacteristicHandle, DiscoveredCharacteristic, DiscoveredService, GattTransport,
    TransportError, TransportEvent,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const CURRENT_TIME_HANDLE: CharacteristicHandle = CharacteristicHandle(0x0003);
pub const INTEGER_HANDLE: CharacteristicHandle = CharacteristicHandle(0x0012);
pub const TEMPERATURE_HANDLE: CharacteristicHandle = CharacteristicHandle(0x0015);
pub const BUTTON_CLICK_HANDLE: CharacteristicHandle = CharacteristicHandle(0x0018);

// ATT error codes
const READ_NOT_PERMITTED: u8 = 0x02;
const WRITE_NOT_PERMITTED: u8 = 0x03;
const INVALID_ATTRIBUTE_LENGTH: u8 = 0x0D;
const CCCD_IMPROPERLY_CONFIGURED: u8 = 0xFD;

/// Discovery result of a SYM Pixl board
pub fn sym_pixl_services() -> Vec<DiscoveredService> {
    let catalog = CapabilityCatalog::sym_pixl();
    let [time_service, sym_service] = catalog.services();
    let characteristic = |attribute, handle, properties| DiscoveredCharacteristic {
        uuid: catalog.requirement(attribute).characteristic,
        handle,
        properties,
    };

    vec![
        DiscoveredService {
            uuid: time_service,
            characteristics: vec![characteristic(
                Attribute::CurrentTime,
                CURRENT_TIME_HANDLE,
                Operations::READ | Operations::WRITE | Operations::NOTIFY,
            )],
        },
        DiscoveredService {
            uuid: sym_service,
            characteristics: vec![
                characteristic(Attribute::Integer, INTEGER_HANDLE, Operations::WRITE),
                characteristic(Attribute::Temperature, TEMPERATURE_HANDLE, Operations::READ),
                characteristic(
                    Attribute::ButtonClicks,
                    BUTTON_CLICK_HANDLE,
                    Operations::NOTIFY,
                ),
            ],
        },
    ]
}

#[derive(Debug)]
struct PeripheralState {
    services: Vec<DiscoveredService>,
    connected: bool,
    failures_left: u32,
    connect_attempts: u32,
    temperature_tenths: u16,
    button_clicks: u8,
    last_integer: Option<u32>,
    current_time: [u8; CURRENT_TIME_LEN],
    subscriptions: HashSet<CharacteristicHandle>,
}

impl PeripheralState {
    fn properties(&self, handle: CharacteristicHandle) -> Option<Operations> {
        self.services
            .iter()
            .flat_map(|service| &service.characteristics)
            .find(|characteristic| characteristic.handle == handle)
            .map(|characteristic| characteristic.properties)
    }

    /// Connected and the handle declares the operation
    fn check(
        &self,
        handle: CharacteristicHandle,
        operation: Operation,
        denied: u8,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let properties = self
            .properties(handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        if !properties.contains(operation.required()) {
            return Err(TransportError::Gatt(denied));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimulatedPeripheral {
    state: Mutex<PeripheralState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SimulatedPeripheral {
    /// Peripheral exposing `services`, plus the receiver for its events
    pub fn new(
        services: Vec<DiscoveredService>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let peripheral = Self {
            state: Mutex::new(PeripheralState {
                services,
                connected: false,
                failures_left: 0,
                connect_attempts: 0,
                temperature_tenths: 205,
                button_clicks: 0,
                last_integer: None,
                current_time: protocol::encode_current_time(&CurrentTime::default()),
                subscriptions: HashSet::new(),
            }),
            events,
        };
        (Arc::new(peripheral), event_rx)
    }

    pub fn sym_pixl() -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        Self::new(sym_pixl_services())
    }

    fn lock(&self) -> MutexGuard<'_, PeripheralState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().failures_left = count;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn set_temperature_tenths(&self, tenths: u16) {
        self.lock().temperature_tenths = tenths;
    }

    /// Last value written to the Integer characteristic
    pub fn last_integer(&self) -> Option<u32> {
        self.lock().last_integer
    }

    /// Clock as last set or ticked
    pub fn current_time(&self) -> CurrentTime {
        let bytes = self.lock().current_time;
        protocol::decode_current_time(&bytes).unwrap_or_default()
    }

    pub fn is_subscribed(&self, handle: CharacteristicHandle) -> bool {
        self.lock().subscriptions.contains(&handle)
    }

    /// Count a button press; notifies if subscribed. Returns the new count.
    pub fn press_button(&self) -> u8 {
        let mut state = self.lock();
        state.button_clicks = state.button_clicks.wrapping_add(1);
        let clicks = state.button_clicks;
        self.notify(&state, BUTTON_CLICK_HANDLE, vec![clicks]);
        clicks
    }

    /// Advance the clock to `time`; notifies if subscribed
    pub fn tick(&self, time: CurrentTime) {
        let mut state = self.lock();
        state.current_time = protocol::encode_current_time(&time);
        let value = state.current_time.to_vec();
        self.notify(&state, CURRENT_TIME_HANDLE, value);
    }

    /// Drop the link from the device side
    pub fn drop_link(&self, reason: DisconnectReason) {
        let mut state = self.lock();
        if !state.connected {
            return;
        }
        state.connected = false;
        state.subscriptions.clear();
        info!("Simulated peripheral dropped the link: {}", reason);
        let _ = self.events.send(TransportEvent::LinkLost { reason });
    }

    fn notify(&self, state: &PeripheralState, handle: CharacteristicHandle, value: Vec<u8>) {
        if state.connected && state.subscriptions.contains(&handle) {
            let _ = self.events.send(TransportEvent::ValueChanged { handle, value });
        }
    }
}

#[async_trait]
impl GattTransport for SimulatedPeripheral {
    async fn connect(&self, device: &DeviceHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(TransportError::Unreachable(format!(
                "{} did not answer",
                device
            )));
        }
        state.connected = true;
        debug!("Simulated peripheral connected as {}", device);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connected = false;
        state.subscriptions.clear();
        Ok(())
    }

    async fn discover_services(&self) -> Result<Vec<DiscoveredService>, TransportError> {
        let state = self.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(state.services.clone())
    }

    async fn read(&self, handle: CharacteristicHandle) -> Result<Vec<u8>, TransportError> {
        let state = self.lock();
        state.check(handle, Operation::Read, READ_NOT_PERMITTED)?;
        match handle {
            TEMPERATURE_HANDLE => Ok(state.temperature_tenths.to_le_bytes().to_vec()),
            CURRENT_TIME_HANDLE => Ok(state.current_time.to_vec()),
            BUTTON_CLICK_HANDLE => Ok(vec![state.button_clicks]),
            _ => Err(TransportError::Gatt(READ_NOT_PERMITTED)),
        }
    }

    async fn write(
        &self,
        handle: CharacteristicHandle,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.check(handle, Operation::Write, WRITE_NOT_PERMITTED)?;
        match handle {
            INTEGER_HANDLE => {
                let bytes: [u8; INTEGER_LEN] = payload
                    .try_into()
                    .map_err(|_| TransportError::Gatt(INVALID_ATTRIBUTE_LENGTH))?;
                state.last_integer = Some(u32::from_le_bytes(bytes));
                Ok(())
            }
            CURRENT_TIME_HANDLE => {
                state.current_time = payload
                    .try_into()
                    .map_err(|_| TransportError::Gatt(INVALID_ATTRIBUTE_LENGTH))?;
                Ok(())
            }
            _ => Err(TransportError::Gatt(WRITE_NOT_PERMITTED)),
        }
    }

    async fn subscribe(&self, handle: CharacteristicHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.check(handle, Operation::Subscribe, CCCD_IMPROPERLY_CONFIGURED)?;
        state.subscriptions.insert(handle);
        Ok(())
    }
}
