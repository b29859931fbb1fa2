//! Notification Dispatcher
//!
//! Decodes inbound characteristic values and publishes the latest value of
//! each attribute. Publication overwrites; nothing is buffered.

use crate::domain::models::{ConnectionState, CurrentTime, DecodedValue, Temperature};
use crate::infrastructure::bluetooth::connection::{ConnectionSession, SessionSnapshot};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::CharacteristicHandle;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Read side of the published values. Cheap to clone; every clone sees the
/// latest snapshot.
#[derive(Debug, Clone)]
pub struct ObservedValues {
    session: watch::Receiver<SessionSnapshot>,
    connected: watch::Receiver<bool>,
    temperature: watch::Receiver<Option<Temperature>>,
    button_clicks: watch::Receiver<u8>,
    current_time: watch::Receiver<Option<CurrentTime>>,
}

impl ObservedValues {
    pub fn session(&self) -> SessionSnapshot {
        *self.session.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.borrow().state
    }

    pub fn connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn temperature(&self) -> Option<Temperature> {
        *self.temperature.borrow()
    }

    /// Temperature text, or "Not available"
    pub fn temperature_text(&self) -> String {
        self.temperature()
            .map(|t| t.to_string())
            .unwrap_or_else(|| Temperature::UNAVAILABLE.to_string())
    }

    pub fn button_clicks(&self) -> u8 {
        *self.button_clicks.borrow()
    }

    pub fn current_time(&self) -> Option<CurrentTime> {
        *self.current_time.borrow()
    }

    /// Current time text, or the placeholder
    pub fn current_time_text(&self) -> String {
        self.current_time()
            .map(|t| t.to_string())
            .unwrap_or_else(|| CurrentTime::PLACEHOLDER.to_string())
    }

    pub fn watch_session(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.clone()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn watch_temperature(&self) -> watch::Receiver<Option<Temperature>> {
        self.temperature.clone()
    }

    pub fn watch_button_clicks(&self) -> watch::Receiver<u8> {
        self.button_clicks.clone()
    }

    pub fn watch_current_time(&self) -> watch::Receiver<Option<CurrentTime>> {
        self.current_time.clone()
    }
}

/// Write side, owned by the service actor
#[derive(Debug)]
pub(crate) struct NotificationDispatcher {
    session: watch::Sender<SessionSnapshot>,
    connected: watch::Sender<bool>,
    temperature: watch::Sender<Option<Temperature>>,
    button_clicks: watch::Sender<u8>,
    current_time: watch::Sender<Option<CurrentTime>>,
}

impl NotificationDispatcher {
    pub(crate) fn new() -> (Self, ObservedValues) {
        let (session_tx, session_rx) = watch::channel(SessionSnapshot::idle());
        let (connected_tx, connected_rx) = watch::channel(false);
        let (temperature_tx, temperature_rx) = watch::channel(None);
        let (clicks_tx, clicks_rx) = watch::channel(0);
        let (time_tx, time_rx) = watch::channel(None);

        let dispatcher = Self {
            session: session_tx,
            connected: connected_tx,
            temperature: temperature_tx,
            button_clicks: clicks_tx,
            current_time: time_tx,
        };
        let observed = ObservedValues {
            session: session_rx,
            connected: connected_rx,
            temperature: temperature_rx,
            button_clicks: clicks_rx,
            current_time: time_rx,
        };
        (dispatcher, observed)
    }

    /// Publish the session view; `connected` only fires when it flips
    pub(crate) fn publish_session(&self, snapshot: SessionSnapshot) {
        self.session.send_replace(snapshot);

        let ready = snapshot.state.is_ready();
        let flipped = self.connected.send_if_modified(|connected| {
            if *connected == ready {
                return false;
            }
            *connected = ready;
            true
        });
        if flipped {
            info!("Connected: {}", ready);
        }
    }

    /// Overwrite the latest value of the decoded attribute
    pub(crate) fn publish(&self, value: DecodedValue) {
        trace!("Publishing latest {}", value.attribute());
        match value {
            DecodedValue::ButtonClicks(clicks) => {
                self.button_clicks.send_replace(clicks);
            }
            DecodedValue::Temperature(temperature) => {
                self.temperature.send_replace(Some(temperature));
            }
            DecodedValue::CurrentTime(time) => {
                self.current_time.send_replace(Some(time));
            }
        }
    }

    /// Route one inbound notification. Values for handles outside the live
    /// session are dropped.
    pub(crate) fn on_notification(
        &self,
        session: Option<&ConnectionSession>,
        handle: CharacteristicHandle,
        value: &[u8],
    ) -> Option<DecodedValue> {
        let Some(attribute) = session.and_then(|s| s.attribute_for(handle)) else {
            debug!("Dropping notification from unmatched handle {}", handle);
            return None;
        };

        match protocol::decode(attribute, value) {
            Ok(decoded) => {
                debug!("Notification on {}: {:?}", attribute, decoded);
                self.publish(decoded);
                Some(decoded)
            }
            Err(e) => {
                warn!("Discarding {} notification: {}", attribute, e);
                None
            }
        }
    }
}
