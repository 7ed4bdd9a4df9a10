//! The event value type used throughout the pipeline.
//!
//! [`InputEvent`] mirrors the kernel's `input_event` (`type`/`code`/`value`
//! plus a timestamp) and adds a small set of [`EventActions`] tags for
//! synthetic events that handlers exchange among themselves. Events are plain
//! values: cheap to copy, compared and hashed by `(type, code, value)` only,
//! and never mutated in place — "modification" returns a changed copy.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::UNIX_EPOCH;

use bitflags::bitflags;

use crate::error::{Error, Result};

/// Event type constants used across the crate (`input-event-codes.h` values).
pub mod ev {
    pub const EV_SYN: u16 = 0x00;
    pub const EV_KEY: u16 = 0x01;
    pub const EV_REL: u16 = 0x02;
    pub const EV_ABS: u16 = 0x03;
    pub const EV_FF: u16 = 0x15;
}

bitflags! {
    /// Tags marking non-standard interpretations of an event.
    ///
    /// These never leave the process; they exist so that wrapping handlers can
    /// tell synthesized events apart from raw kernel input.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventActions: u8 {
        /// Interpret this axis sample as a discrete press/release.
        const AS_KEY = 1 << 0;
        /// Synthetic request for downstream axis handlers to return to neutral.
        const RECENTER = 1 << 1;
        /// The trigger direction of this axis event is negative.
        const NEGATIVE_TRIGGER = 1 << 2;
    }
}

/// One input event, as read from a device or synthesized by a handler.
#[derive(Debug, Clone, Copy)]
pub struct InputEvent {
    /// Timestamp seconds (kernel clock; 0 for synthetic events).
    pub sec: i64,
    /// Timestamp microseconds.
    pub usec: i64,
    /// Event type (`EV_KEY`, `EV_ABS`, ...).
    pub ev_type: u16,
    /// Event code within the type (`KEY_A`, `ABS_X`, ...).
    pub code: u16,
    /// Event value. `1`/`0` for key press/release; hardware units for axes.
    pub value: i32,
    /// Synthetic interpretation tags; empty for raw kernel events.
    pub actions: EventActions,
}

impl InputEvent {
    /// A timestamp-less event with no actions.
    pub fn new(ev_type: u16, code: u16, value: i32) -> Self {
        Self {
            sec: 0,
            usec: 0,
            ev_type,
            code,
            value,
            actions: EventActions::empty(),
        }
    }

    /// Convert from the evdev crate's event type, keeping the timestamp.
    pub fn from_raw(raw: evdev::InputEvent) -> Self {
        let (sec, usec) = match raw.timestamp().duration_since(UNIX_EPOCH) {
            Ok(dur) => (dur.as_secs() as i64, i64::from(dur.subsec_micros())),
            Err(_) => (0, 0),
        };
        Self {
            sec,
            usec,
            ev_type: raw.event_type().0,
            code: raw.code(),
            value: raw.value(),
            actions: EventActions::empty(),
        }
    }

    /// Convert into the evdev crate's event type for writing to a uinput.
    pub fn to_raw(self) -> evdev::InputEvent {
        evdev::InputEvent::new(evdev::EventType(self.ev_type), self.code, self.value)
    }

    /// `(type, code)` — the identity of the channel this event belongs to.
    #[inline]
    pub fn type_and_code(&self) -> (u16, u16) {
        (self.ev_type, self.code)
    }

    /// Copy with a different value.
    #[inline]
    pub fn with_value(mut self, value: i32) -> Self {
        self.value = value;
        self
    }

    /// Copy with the given actions added.
    #[inline]
    pub fn with_actions(mut self, actions: EventActions) -> Self {
        self.actions |= actions;
        self
    }

    /// Whether this is a key or button event.
    #[inline]
    pub fn is_key_event(&self) -> bool {
        self.ev_type == ev::EV_KEY
    }

    /// In a combination, a zero value on an axis means "use as analog".
    #[inline]
    pub fn defines_analog_input(&self) -> bool {
        self.value == 0 && matches!(self.ev_type, ev::EV_ABS | ev::EV_REL)
    }

    /// Whether this is a low-resolution wheel event.
    pub fn is_wheel_event(&self) -> bool {
        self.ev_type == ev::EV_REL
            && matches!(
                self.code,
                c if c == evdev::RelativeAxisType::REL_WHEEL.0
                    || c == evdev::RelativeAxisType::REL_HWHEEL.0
            )
    }

    /// Whether this is a high-resolution wheel event.
    pub fn is_wheel_hi_res_event(&self) -> bool {
        self.ev_type == ev::EV_REL
            && matches!(
                self.code,
                c if c == evdev::RelativeAxisType::REL_WHEEL_HI_RES.0
                    || c == evdev::RelativeAxisType::REL_HWHEEL_HI_RES.0
            )
    }

    /// Timestamp in fractional seconds. Zero for synthetic events.
    #[inline]
    pub fn timestamp(&self) -> f64 {
        self.sec as f64 + self.usec as f64 / 1_000_000.0
    }

    /// Parse the surface form `"type,code,value"`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(',').map(str::trim);
        let (t, c, v) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(t), Some(c), Some(v), None) => (t, c, v),
            _ => return Err(Error::InvalidCombination(s.to_string())),
        };
        let parse_num = |n: &str| {
            n.parse::<i64>()
                .map_err(|_| Error::InvalidCombination(s.to_string()))
        };
        Ok(Self::new(
            u16::try_from(parse_num(t)?).map_err(|_| Error::InvalidCombination(s.to_string()))?,
            u16::try_from(parse_num(c)?).map_err(|_| Error::InvalidCombination(s.to_string()))?,
            i32::try_from(parse_num(v)?).map_err(|_| Error::InvalidCombination(s.to_string()))?,
        ))
    }

    /// The surface form `"type,code,value"`, usable as part of a JSON key.
    pub fn json_key(&self) -> String {
        format!("{},{},{}", self.ev_type, self.code, self.value)
    }
}

/// Timestamps and actions are deliberately excluded: two events are the same
/// trigger if type, code and value agree.
impl PartialEq for InputEvent {
    fn eq(&self, other: &Self) -> bool {
        (self.ev_type, self.code, self.value) == (other.ev_type, other.code, other.value)
    }
}

impl Eq for InputEvent {}

impl Hash for InputEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.ev_type, self.code, self.value).hash(state);
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.ev_type, self.code, self.value)
    }
}
