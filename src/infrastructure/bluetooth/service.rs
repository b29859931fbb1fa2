//! Bluetooth Service Module
//!
//! Public handle of the BLE manager and the task behind it. The task owns the
//! transport, the session, the command queue and the dispatcher; handles talk
//! to it over a channel and read its published state through watch channels.

use crate::domain::error::{BleError, RejectReason};
use crate::domain::models::{
    AppEvent, Attribute, ConnectionState, CurrentTime, DeviceHandle, MessageSeverity,
    StatusMessage,
};
use crate::infrastructure::bluetooth::catalog::CapabilityCatalog;
use crate::infrastructure::bluetooth::connection::{
    self, ConnectionConfig, ConnectionSession, SessionSnapshot,
};
use crate::infrastructure::bluetooth::dispatcher::{NotificationDispatcher, ObservedValues};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::queue::{
    self, CommandKind, CommandOutput, CommandQueue, CommandReceipt, PendingCommand, RawOutput,
};
use crate::infrastructure::bluetooth::transport::{
    DiscoveredService, GattTransport, TransportError, TransportEvent,
};
use chrono::{Datelike, Timelike};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

enum Request {
    Connect(DeviceHandle),
    Disconnect,
    Enqueue(PendingCommand),
}

/// Result of the single outstanding transport step
enum StepOutcome {
    Linked(Result<(), BleError>),
    Discovered(Result<Vec<DiscoveredService>, TransportError>),
    Command(Result<RawOutput, TransportError>),
}

type StepFuture = Pin<Box<dyn Future<Output = StepOutcome> + Send>>;

struct InFlight {
    future: StepFuture,
    /// Set when the step is a queued command
    command: Option<PendingCommand>,
}

/// Handle to the BLE manager. Cheap to clone; the manager task stops once
/// every handle is dropped.
#[derive(Debug, Clone)]
pub struct BluetoothService {
    requests: mpsc::UnboundedSender<Request>,
    observed: ObservedValues,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(device) => write!(f, "Connect({})", device),
            Self::Disconnect => f.write_str("Disconnect"),
            Self::Enqueue(command) => write!(
                f,
                "Enqueue({} on {})",
                command.kind().operation(),
                command.attribute()
            ),
        }
    }
}

impl BluetoothService {
    /// Start the manager task on the current tokio runtime.
    ///
    /// `transport_events` carries link losses and notifications from the
    /// same transport. `event_sender` receives state changes, errors and
    /// user-facing log lines.
    pub fn spawn<T: GattTransport>(
        transport: Arc<T>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        catalog: CapabilityCatalog,
        config: ConnectionConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (dispatcher, observed) = NotificationDispatcher::new();

        let actor = ServiceActor {
            transport,
            catalog,
            config,
            session: None,
            state: ConnectionState::Idle,
            queue: CommandQueue::new(),
            in_flight: None,
            dispatcher,
            transport_events,
            event_sender,
        };
        tokio::spawn(actor.run(request_rx));

        Self { requests, observed }
    }

    /// Start a session with `device`. Ignored unless the manager is idle.
    pub fn connect(&self, device: DeviceHandle) {
        if self.requests.send(Request::Connect(device)).is_err() {
            warn!("Connect requested after the bluetooth service stopped");
        }
    }

    /// Tear down the current session. Pending commands complete with
    /// `Cancelled`. No-op when idle.
    pub fn disconnect(&self) {
        if self.requests.send(Request::Disconnect).is_err() {
            warn!("Disconnect requested after the bluetooth service stopped");
        }
    }

    pub fn read_temperature(&self) -> Result<CommandReceipt, BleError> {
        self.enqueue(Attribute::Temperature, CommandKind::Read)
    }

    pub fn read_current_time(&self) -> Result<CommandReceipt, BleError> {
        self.enqueue(Attribute::CurrentTime, CommandKind::Read)
    }

    /// Write a 32-bit value to the Integer characteristic
    pub fn send_integer(&self, value: u32) -> Result<CommandReceipt, BleError> {
        self.enqueue(
            Attribute::Integer,
            CommandKind::Write(protocol::encode_integer(value).to_vec()),
        )
    }

    /// Set the device clock from a calendar value, e.g. `chrono::Local::now()`
    pub fn set_date<C: Datelike + Timelike>(&self, calendar: &C) -> Result<CommandReceipt, BleError> {
        self.set_current_time(protocol::current_time_from_calendar(calendar))
    }

    pub fn set_current_time(&self, time: CurrentTime) -> Result<CommandReceipt, BleError> {
        self.enqueue(
            Attribute::CurrentTime,
            CommandKind::Write(protocol::encode_current_time(&time).to_vec()),
        )
    }

    /// Queue a command against a matched characteristic.
    ///
    /// Rejected immediately, without touching the transport, when the
    /// session is not ready or the attribute has no matched characteristic.
    pub fn enqueue(
        &self,
        attribute: Attribute,
        kind: CommandKind,
    ) -> Result<CommandReceipt, BleError> {
        let snapshot = self.observed.session();
        if !snapshot.state.is_ready() {
            return Err(BleError::CommandRejected(RejectReason::NotReady(
                snapshot.state,
            )));
        }
        if !snapshot.accepts(attribute) {
            return Err(BleError::CommandRejected(RejectReason::Unmatched(attribute)));
        }

        let (command, receipt) = PendingCommand::new(attribute, kind);
        self.requests
            .send(Request::Enqueue(command))
            .map_err(|_| BleError::CommandRejected(RejectReason::ServiceStopped))?;
        Ok(receipt)
    }

    /// Latest published values
    pub fn observe(&self) -> ObservedValues {
        self.observed.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.observed.state()
    }

    pub fn is_connected(&self) -> bool {
        self.observed.connected()
    }
}

struct ServiceActor<T: GattTransport> {
    transport: Arc<T>,
    catalog: CapabilityCatalog,
    config: ConnectionConfig,
    session: Option<ConnectionSession>,
    state: ConnectionState,
    queue: CommandQueue,
    in_flight: Option<InFlight>,
    dispatcher: NotificationDispatcher,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

/// Wait for the outstanding step, or forever if there is none
async fn settle(in_flight: &mut Option<InFlight>) -> (StepOutcome, Option<PendingCommand>) {
    let Some(current) = in_flight.as_mut() else {
        return std::future::pending().await;
    };
    let outcome = current.future.as_mut().await;
    let command = in_flight.take().and_then(|finished| finished.command);
    (outcome, command)
}

impl<T: GattTransport> ServiceActor<T> {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        info!("Bluetooth service started");

        loop {
            // Requests already waiting are handled before the next dispatch,
            // so a disconnect overtakes commands still in the queue
            loop {
                match requests.try_recv() {
                    Ok(request) => self.handle_request(request).await,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.shutdown().await;
                        return;
                    }
                }
            }

            self.dispatch_next();

            tokio::select! {
                biased;
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                Some(event) = self.transport_events.recv() => {
                    self.handle_transport_event(event).await;
                }
                (outcome, command) = settle(&mut self.in_flight) => {
                    self.handle_outcome(outcome, command).await;
                }
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        debug!("Handling request {:?}", request);
        match request {
            Request::Connect(device) => self.start_connect(device),
            Request::Disconnect => {
                if self.state.is_idle() {
                    debug!("Disconnect requested while idle");
                    return;
                }
                info!("Disconnect requested");
                self.teardown(true).await;
            }
            Request::Enqueue(command) => {
                let accepted = self.state.is_ready()
                    && self
                        .session
                        .as_ref()
                        .and_then(|session| session.handle(command.attribute()))
                        .is_some();
                if accepted {
                    self.queue.push(command);
                } else {
                    debug!(
                        "Session ended before {} command arrived",
                        command.attribute()
                    );
                    command.complete(Err(BleError::Cancelled));
                }
            }
        }
    }

    fn start_connect(&mut self, device: DeviceHandle) {
        if !self.state.is_idle() {
            info!("Ignoring connect to {}: session is {}", device, self.state);
            return;
        }

        self.send_log(format!("Connecting to {}...", device), MessageSeverity::Info);
        self.session = Some(ConnectionSession::new(device.clone()));
        self.set_state(ConnectionState::Connecting);

        let transport = Arc::clone(&self.transport);
        let config = self.config.clone();
        self.start(
            async move {
                StepOutcome::Linked(
                    connection::connect_with_retry(transport.as_ref(), &device, &config).await,
                )
            },
            None,
        );
    }

    fn start(
        &mut self,
        future: impl Future<Output = StepOutcome> + Send + 'static,
        command: Option<PendingCommand>,
    ) {
        self.in_flight = Some(InFlight {
            future: Box::pin(future),
            command,
        });
    }

    /// Issue the head of the queue once the previous command has settled
    fn dispatch_next(&mut self) {
        if self.in_flight.is_some() || !self.state.is_ready() {
            return;
        }

        while let Some(command) = self.queue.pop() {
            let attribute = command.attribute();
            let Some(handle) = self
                .session
                .as_ref()
                .and_then(|session| session.handle(attribute))
            else {
                command.complete(Err(BleError::CommandRejected(RejectReason::Unmatched(
                    attribute,
                ))));
                continue;
            };

            debug!(
                "Dispatching {} on {} ({}), {} still queued",
                command.kind().operation(),
                attribute,
                handle,
                self.queue.len()
            );
            let transport = Arc::clone(&self.transport);
            let kind = command.kind().clone();
            self.start(
                async move { StepOutcome::Command(queue::issue(transport, handle, kind).await) },
                Some(command),
            );
            return;
        }
    }

    async fn handle_outcome(&mut self, outcome: StepOutcome, command: Option<PendingCommand>) {
        match outcome {
            StepOutcome::Linked(Ok(())) => {
                self.set_state(ConnectionState::Discovering);
                let transport = Arc::clone(&self.transport);
                self.start(
                    async move { StepOutcome::Discovered(transport.discover_services().await) },
                    None,
                );
            }
            StepOutcome::Linked(Err(e)) => {
                self.set_state(ConnectionState::Failed);
                self.report(e);
                self.session = None;
                self.set_state(ConnectionState::Idle);
            }
            StepOutcome::Discovered(Ok(services)) => {
                info!("Discovered {} services", services.len());
                self.set_state(ConnectionState::Validating);
                match self.catalog.validate(&services) {
                    Ok(matched) => {
                        if let Some(session) = self.session.as_mut() {
                            session.install(matched);
                        }
                        self.set_state(ConnectionState::Ready);
                        self.send_log("Connection established!", MessageSeverity::Success);
                        self.bootstrap();
                    }
                    Err(e) => {
                        self.report(e);
                        self.teardown(true).await;
                    }
                }
            }
            StepOutcome::Discovered(Err(e)) => {
                self.report(self.setup_failed(format!("service discovery failed: {}", e)));
                self.teardown(true).await;
            }
            StepOutcome::Command(result) => match command {
                Some(command) => self.complete_command(command, result),
                None => warn!("Command outcome without a command"),
            },
        }
    }

    /// Subscriptions and the first temperature read of a fresh session
    fn bootstrap(&mut self) {
        self.queue.push(PendingCommand::internal(
            Attribute::ButtonClicks,
            CommandKind::Subscribe,
        ));
        self.queue.push(PendingCommand::internal(
            Attribute::CurrentTime,
            CommandKind::Subscribe,
        ));
        self.queue
            .push(PendingCommand::internal(Attribute::Temperature, CommandKind::Read));
    }

    fn complete_command(
        &mut self,
        command: PendingCommand,
        result: Result<RawOutput, TransportError>,
    ) {
        let attribute = command.attribute();
        let operation = command.kind().operation();

        let outcome = match result {
            Ok(RawOutput::Read(bytes)) => protocol::decode(attribute, &bytes)
                .map(|value| {
                    self.dispatcher.publish(value);
                    CommandOutput::Read(value)
                })
                .map_err(BleError::from),
            Ok(RawOutput::Written) => Ok(CommandOutput::Written),
            Ok(RawOutput::Subscribed) => Ok(CommandOutput::Subscribed),
            Err(e) => Err(BleError::CommandFailed {
                attribute,
                operation,
                reason: e.to_string(),
            }),
        };

        match &outcome {
            Ok(output) => debug!("{} on {} completed: {:?}", operation, attribute, output),
            Err(e) if command.is_internal() => self.report(e.clone()),
            Err(e) => warn!("{}", e),
        }
        command.complete(outcome);
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ValueChanged { handle, value } => {
                if !self.state.is_ready() {
                    debug!("Ignoring value from {} while {}", handle, self.state);
                    return;
                }
                self.dispatcher
                    .on_notification(self.session.as_ref(), handle, &value);
            }
            TransportEvent::LinkLost { reason } => {
                let err = match self.state {
                    ConnectionState::Idle => {
                        debug!("Link loss reported while idle: {}", reason);
                        return;
                    }
                    // The link is not up yet; the connect outcome decides
                    ConnectionState::Connecting => {
                        debug!("Ignoring link loss while connecting: {}", reason);
                        return;
                    }
                    ConnectionState::Ready => BleError::DeviceDisconnected { reason },
                    state => self.setup_failed(format!("link lost while {}: {}", state, reason)),
                };
                warn!("Link lost while {}: {}", self.state, reason);
                self.report(err);
                self.teardown(false).await;
            }
        }
    }

    /// Cancel all work, optionally close the link, and return to idle
    async fn teardown(&mut self, close_link: bool) {
        self.set_state(ConnectionState::Disconnecting);

        if let Some(in_flight) = self.in_flight.take() {
            if let Some(command) = in_flight.command {
                debug!("Cancelling in-flight {} command", command.attribute());
                command.complete(Err(BleError::Cancelled));
            }
        }
        let cancelled = self.queue.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} pending command(s)", cancelled);
        }

        if close_link {
            let transport = Arc::clone(&self.transport);
            if let Err(e) = transport.disconnect().await {
                warn!("Transport disconnect failed: {}", e);
            }
            // Whatever the closed link reported must not reach the next session
            while let Ok(event) = self.transport_events.try_recv() {
                debug!("Discarding event of the closed link: {:?}", event);
            }
        }

        self.session = None;
        self.set_state(ConnectionState::Idle);
        self.send_log("Disconnected from device", MessageSeverity::Info);
    }

    async fn shutdown(&mut self) {
        if !self.state.is_idle() {
            self.teardown(true).await;
        }
        info!("Bluetooth service stopped");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!("Connection state: {} -> {}", self.state, state);
        self.state = state;

        let snapshot = match self.session.as_mut() {
            Some(session) => {
                session.set_state(state);
                session.snapshot()
            }
            None => SessionSnapshot {
                state,
                ..SessionSnapshot::idle()
            },
        };
        self.dispatcher.publish_session(snapshot);
        let _ = self.event_sender.send(AppEvent::ConnectionStatus(state));
    }

    /// Failure of a session that never reached `Ready`
    fn setup_failed(&self, reason: String) -> BleError {
        BleError::ConnectionFailed {
            device: self
                .session
                .as_ref()
                .map(|session| session.device().to_string())
                .unwrap_or_default(),
            attempts: 1,
            reason,
        }
    }

    fn report(&self, err: BleError) {
        error!("{}", err);
        let _ = self.event_sender.send(AppEvent::Error(err));
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }
}
