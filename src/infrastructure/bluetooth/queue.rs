//! Command Queue
//!
//! FIFO of read/write/subscribe commands waiting for the transport. The
//! service actor pops one command at a time and only pops the next once the
//! transport has answered the previous one.

use crate::domain::error::BleError;
use crate::domain::models::{Attribute, DecodedValue, Operation};
use crate::infrastructure::bluetooth::transport::{
    CharacteristicHandle, GattTransport, TransportError,
};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

/// Operation and payload of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    /// Payload already encoded by the codec
    Write(Vec<u8>),
    Subscribe,
}

impl CommandKind {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Read => Operation::Read,
            Self::Write(_) => Operation::Write,
            Self::Subscribe => Operation::Subscribe,
        }
    }
}

/// Successful completion of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    /// Value read back, already decoded
    Read(DecodedValue),
    Written,
    Subscribed,
}

pub type CommandResult = Result<CommandOutput, BleError>;

/// Raw transport answer, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawOutput {
    Read(Vec<u8>),
    Written,
    Subscribed,
}

/// Where a command's outcome goes
#[derive(Debug)]
enum CompletionSink {
    Caller(oneshot::Sender<CommandResult>),
    /// Issued by the service itself when the session becomes ready
    Internal,
}

/// Awaitable outcome of an accepted command.
///
/// Resolves to `Err(BleError::Cancelled)` if the service drops the command
/// without answering.
#[derive(Debug)]
pub struct CommandReceipt {
    receiver: oneshot::Receiver<CommandResult>,
}

impl Future for CommandReceipt {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BleError::Cancelled)))
    }
}

#[derive(Debug)]
pub struct PendingCommand {
    attribute: Attribute,
    kind: CommandKind,
    sink: CompletionSink,
}

impl PendingCommand {
    /// Command whose outcome is delivered through the returned receipt
    pub fn new(attribute: Attribute, kind: CommandKind) -> (Self, CommandReceipt) {
        let (sender, receiver) = oneshot::channel();
        let command = Self {
            attribute,
            kind,
            sink: CompletionSink::Caller(sender),
        };
        (command, CommandReceipt { receiver })
    }

    pub(crate) fn internal(attribute: Attribute, kind: CommandKind) -> Self {
        Self {
            attribute,
            kind,
            sink: CompletionSink::Internal,
        }
    }

    pub fn attribute(&self) -> Attribute {
        self.attribute
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.sink, CompletionSink::Internal)
    }

    /// Deliver the outcome; a caller that dropped its receipt is ignored
    pub fn complete(self, result: CommandResult) {
        if let CompletionSink::Caller(sender) = self.sink {
            let _ = sender.send(result);
        }
    }
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: VecDeque<PendingCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: PendingCommand) {
        debug!(
            "Queued {} on {} ({} pending)",
            command.kind.operation(),
            command.attribute,
            self.pending.len() + 1
        );
        self.pending.push_back(command);
    }

    pub fn pop(&mut self) -> Option<PendingCommand> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Complete every pending command with `Cancelled`; returns how many
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        for command in self.pending.drain(..) {
            command.complete(Err(BleError::Cancelled));
        }
        count
    }
}

/// Issue one command on the transport
pub(crate) async fn issue<T: GattTransport + ?Sized>(
    transport: Arc<T>,
    handle: CharacteristicHandle,
    kind: CommandKind,
) -> Result<RawOutput, TransportError> {
    match kind {
        CommandKind::Read => transport.read(handle).await.map(RawOutput::Read),
        CommandKind::Write(payload) => transport
            .write(handle, &payload)
            .await
            .map(|()| RawOutput::Written),
        CommandKind::Subscribe => transport
            .subscribe(handle)
            .await
            .map(|()| RawOutput::Subscribed),
    }
}
