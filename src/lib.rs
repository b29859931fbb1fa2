//! Peripheral manager for the SYM Pixl BLE board.
//!
//! [`BluetoothService`] drives one connection at a time over any
//! [`GattTransport`]: it connects with a bounded retry, validates the
//! device's services against a [`CapabilityCatalog`], serializes reads,
//! writes and subscriptions, and publishes the latest decoded values.

pub mod domain;
pub mod infrastructure;

pub use domain::error::{BleError, CodecError, DisconnectReason, RejectReason};
pub use domain::models::{
    AppEvent, Attribute, ConnectionState, CurrentTime, DecodedValue, DeviceHandle, Temperature,
};
pub use infrastructure::bluetooth::catalog::CapabilityCatalog;
pub use infrastructure::bluetooth::connection::ConnectionConfig;
pub use infrastructure::bluetooth::dispatcher::ObservedValues;
pub use infrastructure::bluetooth::queue::{CommandKind, CommandOutput, CommandReceipt};
pub use infrastructure::bluetooth::simulator::SimulatedPeripheral;
pub use infrastructure::bluetooth::transport::{GattTransport, TransportEvent};
pub use infrastructure::bluetooth::BluetoothService;
