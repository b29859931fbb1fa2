use crate::domain::models::{Attribute, ConnectionState, Operation};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by the BLE manager to its callers and observers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("connection to {device} failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed {
        device: String,
        attempts: u32,
        reason: String,
    },

    #[error("device not supported, missing: {}", .missing.join(", "))]
    UnsupportedDevice { missing: Vec<String> },

    #[error("device disconnected: {reason}")]
    DeviceDisconnected { reason: DisconnectReason },

    #[error("command rejected: {0}")]
    CommandRejected(RejectReason),

    #[error("{operation} on {attribute} failed: {reason}")]
    CommandFailed {
        attribute: Attribute,
        operation: Operation,
        reason: String,
    },

    #[error("command cancelled")]
    Cancelled,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Why a link went down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer or stack dropped the device for lacking required services
    NotSupported,
    LinkLoss,
    /// Platform status code with no better mapping
    Unknown(i32),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSupported => f.write_str("not supported"),
            Self::LinkLoss => f.write_str("link loss"),
            Self::Unknown(code) => write!(f, "unknown reason ({})", code),
        }
    }
}

/// Why `enqueue` refused a command without touching the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotReady(ConnectionState),
    Unmatched(Attribute),
    ServiceStopped,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady(state) => write!(f, "session is {}, not ready", state),
            Self::Unmatched(attribute) => write!(f, "no matched {} characteristic", attribute),
            Self::ServiceStopped => f.write_str("bluetooth service stopped"),
        }
    }
}

/// Malformed characteristic payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{attribute} payload too short: expected at least {expected} bytes, got {got}")]
    PayloadTooShort {
        attribute: Attribute,
        expected: usize,
        got: usize,
    },

    #[error("{0} is write-only and has no decoder")]
    WriteOnly(Attribute),
}
