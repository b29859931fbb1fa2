//! BLE Connection Module
//!
//! The connection session owned by the service actor, and the transport-level
//! connect step with its bounded retry.

use crate::domain::error::BleError;
use crate::domain::models::{Attribute, ConnectionState, DeviceHandle};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::catalog::MatchedCharacteristics;
use crate::infrastructure::bluetooth::transport::{CharacteristicHandle, GattTransport};
use std::time::Duration;
use tracing::{error, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Extra attempts after the first failed connect
    pub connect_retries: u32,
    /// Delay between connect attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_retries: 1,
            retry_delay_ms: 100,
        }
    }
}

impl From<&Settings> for ConnectionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            connect_retries: settings.connect_retries,
            retry_delay_ms: settings.connect_retry_delay_ms,
        }
    }
}

/// State of one connection attempt, from `connect` until the link is torn
/// down. Dropping the session drops every characteristic handle with it.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    device: DeviceHandle,
    state: ConnectionState,
    characteristics: MatchedCharacteristics,
}

impl ConnectionSession {
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            state: ConnectionState::Connecting,
            characteristics: MatchedCharacteristics::default(),
        }
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Record the handles found during validation
    pub(crate) fn install(&mut self, characteristics: MatchedCharacteristics) {
        self.characteristics = characteristics;
    }

    pub fn handle(&self, attribute: Attribute) -> Option<CharacteristicHandle> {
        self.characteristics.handle(attribute)
    }

    pub fn attribute_for(&self, handle: CharacteristicHandle) -> Option<Attribute> {
        self.characteristics.attribute_for(handle)
    }

    /// Immutable view published to handles and observers
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            characteristics: self.characteristics,
        }
    }
}

/// What callers outside the actor may know about the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub characteristics: MatchedCharacteristics,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self::default()
    }

    /// A command against `attribute` may be enqueued
    pub fn accepts(&self, attribute: Attribute) -> bool {
        self.state.is_ready() && self.characteristics.get(attribute).is_some()
    }
}

/// Connect to a device, retrying a failed attempt after a fixed delay.
///
/// No auto-reconnect: once the attempts are spent the error is final.
pub async fn connect_with_retry<T: GattTransport + ?Sized>(
    transport: &T,
    device: &DeviceHandle,
    config: &ConnectionConfig,
) -> Result<(), BleError> {
    let attempts = config.connect_retries.saturating_add(1);

    let mut attempt = 1;
    loop {
        info!("Connecting to {} (attempt {}/{})", device, attempt, attempts);
        match transport.connect(device).await {
            Ok(()) => {
                info!("Link established with {}", device);
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                warn!(
                    "Connect attempt {} to {} failed: {}. Retrying in {} ms",
                    attempt, device, e, config.retry_delay_ms
                );
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                attempt += 1;
            }
            Err(e) => {
                error!("Failed to connect to {} after {} attempts: {}", device, attempts, e);
                return Err(BleError::ConnectionFailed {
                    device: device.to_string(),
                    attempts,
                    reason: e.to_string(),
                });
            }
        }
    }
}
