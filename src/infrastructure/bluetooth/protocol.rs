//! SYM Device Protocol
//!
//! GATT identifiers of the SYM peripheral and the fixed-layout codecs of its
//! four attributes. Everything here is pure: no I/O, no state.

use crate::domain::error::CodecError;
use crate::domain::models::{Attribute, CurrentTime, DecodedValue, Temperature};
use chrono::{Datelike, Timelike};
use tracing::trace;

/// Standard Current Time service
pub const TIME_SERVICE_UUID: &str = "00001805-0000-1000-8000-00805f9b34fb";

/// Current Time characteristic (read/notify)
pub const CURRENT_TIME_CHAR_UUID: &str = "00002a2b-0000-1000-8000-00805f9b34fb";

/// Vendor SYM service
pub const SYM_SERVICE_UUID: &str = "3c0a1000-281d-4b48-b2a7-f15579a1c38f";

/// Free-form integer characteristic (write)
pub const INTEGER_CHAR_UUID: &str = "3c0a1001-281d-4b48-b2a7-f15579a1c38f";

/// Temperature characteristic (read)
pub const TEMPERATURE_CHAR_UUID: &str = "3c0a1002-281d-4b48-b2a7-f15579a1c38f";

/// Button click counter characteristic (notify)
pub const BUTTON_CLICK_CHAR_UUID: &str = "3c0a1003-281d-4b48-b2a7-f15579a1c38f";

pub const BUTTON_CLICKS_LEN: usize = 1;
pub const TEMPERATURE_LEN: usize = 2;
pub const INTEGER_LEN: usize = 4;
pub const CURRENT_TIME_LEN: usize = 10;

/// Bytes of the Current Time payload that carry fields; the rest is reserved
const CURRENT_TIME_FIELDS_LEN: usize = 8;

fn ensure_len(attribute: Attribute, bytes: &[u8], expected: usize) -> Result<(), CodecError> {
    if bytes.len() < expected {
        return Err(CodecError::PayloadTooShort {
            attribute,
            expected,
            got: bytes.len(),
        });
    }
    Ok(())
}

/// Button click counter: one unsigned byte
pub fn decode_button_clicks(bytes: &[u8]) -> Result<u8, CodecError> {
    ensure_len(Attribute::ButtonClicks, bytes, BUTTON_CLICKS_LEN)?;
    Ok(bytes[0])
}

/// Temperature: u16 little-endian in tenths of a degree
pub fn decode_temperature(bytes: &[u8]) -> Result<Temperature, CodecError> {
    ensure_len(Attribute::Temperature, bytes, TEMPERATURE_LEN)?;
    let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
    Ok(Temperature::from_tenths(i32::from(raw)))
}

/// Integer: u32 little-endian. The device never reports it back.
pub fn encode_integer(value: u32) -> [u8; INTEGER_LEN] {
    value.to_le_bytes()
}

/// Encode a Current Time payload
///
/// # Layout (10 bytes)
///
/// ```text
/// [0-1] : Year (u16 little-endian)
/// [2]   : Month (1-12)
/// [3]   : Day of month
/// [4]   : Hour
/// [5]   : Minute
/// [6]   : Second
/// [7]   : Weekday (1 = Monday ... 7 = Sunday)
/// [8-9] : Reserved, always zero
/// ```
pub fn encode_current_time(time: &CurrentTime) -> [u8; CURRENT_TIME_LEN] {
    let [year_lo, year_hi] = time.year.to_le_bytes();
    [
        year_lo,
        year_hi,
        time.month,
        time.day,
        time.hour,
        time.minute,
        time.second,
        time.weekday,
        0,
        0,
    ]
}

/// Decode a Current Time payload; reserved bytes are ignored
pub fn decode_current_time(bytes: &[u8]) -> Result<CurrentTime, CodecError> {
    ensure_len(Attribute::CurrentTime, bytes, CURRENT_TIME_FIELDS_LEN)?;
    Ok(CurrentTime {
        year: u16::from_le_bytes([bytes[0], bytes[1]]),
        month: bytes[2],
        day: bytes[3],
        hour: bytes[4],
        minute: bytes[5],
        second: bytes[6],
        weekday: bytes[7],
    })
}

/// Decode the payload of a readable or notifying attribute
pub fn decode(attribute: Attribute, bytes: &[u8]) -> Result<DecodedValue, CodecError> {
    trace!("Decoding {} payload: {:02X?}", attribute, bytes);
    match attribute {
        Attribute::ButtonClicks => decode_button_clicks(bytes).map(DecodedValue::ButtonClicks),
        Attribute::Temperature => decode_temperature(bytes).map(DecodedValue::Temperature),
        Attribute::CurrentTime => decode_current_time(bytes).map(DecodedValue::CurrentTime),
        Attribute::Integer => Err(CodecError::WriteOnly(Attribute::Integer)),
    }
}

/// Zero-based month to 1-12; a stray 12 wraps back to January
pub fn normalize_month(month0: u32) -> u8 {
    (month0 % 12 + 1) as u8
}

/// Sunday-first day of week (1 = Sunday) to the device's Monday-first 1-7
pub fn weekday_from_sunday_first(day_of_week: u32) -> u8 {
    ((day_of_week + 5) % 7 + 1) as u8
}

/// Build a Current Time value from any calendar type.
///
/// Years outside 0-65535 are clamped to the representable range.
pub fn current_time_from_calendar<C: Datelike + Timelike>(calendar: &C) -> CurrentTime {
    CurrentTime {
        year: calendar.year().clamp(0, i32::from(u16::MAX)) as u16,
        month: normalize_month(calendar.month0()),
        day: calendar.day() as u8,
        hour: calendar.hour() as u8,
        minute: calendar.minute() as u8,
        second: calendar.second() as u8,
        weekday: weekday_from_sunday_first(calendar.weekday().number_from_sunday()),
    }
}
