//! Domain Models
//!
//! Device handles, lifecycle states, decoded attribute values and the events
//! published to the UI layer.

use crate::domain::error::BleError;
use std::fmt;
use std::ops::BitOr;

/// Opaque identifier of a discovered peripheral, handed over by the scan layer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceHandle(String);

impl DeviceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Discovering,
    Validating,
    Ready,
    Disconnecting,
    /// Terminal for one attempt, always followed by `Idle`
    Failed,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::Validating => "validating",
            Self::Ready => "ready",
            Self::Disconnecting => "disconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Device attributes addressed by commands and notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    ButtonClicks,
    Temperature,
    Integer,
    CurrentTime,
}

impl Attribute {
    pub const ALL: [Attribute; 4] = [
        Attribute::ButtonClicks,
        Attribute::Temperature,
        Attribute::Integer,
        Attribute::CurrentTime,
    ];
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ButtonClicks => "button clicks",
            Self::Temperature => "temperature",
            Self::Integer => "integer",
            Self::CurrentTime => "current time",
        };
        f.write_str(name)
    }
}

/// Kind of GATT operation a command performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Subscribe,
}

impl Operation {
    /// Characteristic property the operation relies on
    pub fn required(self) -> Operations {
        match self {
            Self::Read => Operations::READ,
            Self::Write => Operations::WRITE,
            Self::Subscribe => Operations::NOTIFY,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Subscribe => "subscribe",
        };
        f.write_str(name)
    }
}

/// Set of GATT operations.
///
/// Used both for the properties a characteristic declares during discovery
/// and for the operations a catalog requirement demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Operations(u8);

impl Operations {
    pub const NONE: Operations = Operations(0);
    pub const READ: Operations = Operations(0b001);
    pub const WRITE: Operations = Operations(0b010);
    pub const NOTIFY: Operations = Operations(0b100);

    pub const fn union(self, other: Operations) -> Operations {
        Operations(self.0 | other.0)
    }

    /// True when every operation in `other` is also in `self`
    pub const fn contains(self, other: Operations) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Operations {
    type Output = Operations;

    fn bitor(self, rhs: Operations) -> Operations {
        self.union(rhs)
    }
}

impl fmt::Display for Operations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = [
            (Self::READ, "read"),
            (Self::WRITE, "write"),
            (Self::NOTIFY, "notify"),
        ]
        .into_iter()
        .filter(|(op, _)| self.contains(*op))
        .map(|(_, name)| name)
        .collect();
        f.write_str(&names.join("|"))
    }
}

/// Temperature with one implied decimal digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Temperature {
    tenths: i32,
}

impl Temperature {
    /// Text shown while no reading has been received
    pub const UNAVAILABLE: &'static str = "Not available";

    pub fn from_tenths(tenths: i32) -> Self {
        Self { tenths }
    }

    pub fn tenths(self) -> i32 {
        self.tenths
    }

    pub fn celsius(self) -> f32 {
        self.tenths as f32 / 10.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.tenths < 0 { "-" } else { "" };
        let abs = self.tenths.unsigned_abs();
        write!(f, "{}{}.{}", sign, abs / 10, abs % 10)
    }
}

/// Decoded content of the Current Time characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentTime {
    pub year: u16,
    /// 1-12
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// 1 = Monday ... 7 = Sunday
    pub weekday: u8,
}

impl CurrentTime {
    /// Text shown while no timestamp has been received
    pub const PLACEHOLDER: &'static str = "DD / MM / YY hh:mm:ss";
}

/// Same text as the SYM companion app, which prints the payload bytes in
/// wire order 3, 2, 0-1, 4, 5, 6 (labelling bytes 5 and 6 "second" and
/// "minute").
impl fmt::Display for CurrentTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}/{:02}/{:02} {:02}:{:02}:{:02}",
            self.day, self.month, self.year, self.hour, self.minute, self.second
        )
    }
}

/// Typed value produced by the codec from a characteristic payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedValue {
    ButtonClicks(u8),
    Temperature(Temperature),
    CurrentTime(CurrentTime),
}

impl DecodedValue {
    pub fn attribute(&self) -> Attribute {
        match self {
            Self::ButtonClicks(_) => Attribute::ButtonClicks,
            Self::Temperature(_) => Attribute::Temperature,
            Self::CurrentTime(_) => Attribute::CurrentTime,
        }
    }
}

/// Events pushed to the UI layer
#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionState),
    Error(BleError),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
