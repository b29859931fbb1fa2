//! GATT Transport Contract
//!
//! The operations the manager needs from a platform BLE stack. Platform
//! bindings live outside this crate; the in-memory
//! [`SimulatedPeripheral`](super::simulator::SimulatedPeripheral) is the
//! bundled implementation.

use crate::domain::error::DisconnectReason;
use crate::domain::models::{DeviceHandle, Operations};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Attribute handle assigned by the remote GATT server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicHandle(pub u16);

impl fmt::Display for CharacteristicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub handle: CharacteristicHandle,
    /// Operations the characteristic declares in its properties
    pub properties: Operations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// Unsolicited input from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    LinkLost { reason: DisconnectReason },
    ValueChanged {
        handle: CharacteristicHandle,
        value: Vec<u8>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("not connected")]
    NotConnected,

    #[error("GATT status {0:#04x}")]
    Gatt(u8),

    #[error("unknown characteristic handle {0}")]
    UnknownHandle(CharacteristicHandle),
}

/// Operations the manager issues against one peripheral.
///
/// Calls are never overlapped by the manager. Link-state changes and
/// notifications are delivered separately through a
/// `tokio::sync::mpsc::UnboundedReceiver<TransportEvent>` handed to
/// [`BluetoothService::spawn`](super::service::BluetoothService::spawn).
#[async_trait]
pub trait GattTransport: Send + Sync + 'static {
    /// Establish the link; a single attempt, no auto-reconnect
    async fn connect(&self, device: &DeviceHandle) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn discover_services(&self) -> Result<Vec<DiscoveredService>, TransportError>;

    async fn read(&self, handle: CharacteristicHandle) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, handle: CharacteristicHandle, payload: &[u8])
        -> Result<(), TransportError>;

    /// Enable notifications (write the CCCD)
    async fn subscribe(&self, handle: CharacteristicHandle) -> Result<(), TransportError>;
}
