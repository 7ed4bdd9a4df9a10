//! Multi-event trigger chords.
//!
//! An [`InputCombination`] is an ordered, non-empty tuple of [`InputEvent`]s
//! acting as one composite trigger. The last element is the "triggering"
//! event: it decides which per-`(type, code)` handler list the combination is
//! filed under, and it stays fixed when permutations are generated.
//!
//! The canonical surface form is `"t1,c1,v1+t2,c2,v2"`; it round-trips
//! through [`InputCombination::parse`] / [`InputCombination::json_key`] and is
//! what presets store on disk.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::event::{ev, InputEvent};

/// Keys that tend to be intercepted or modified by the host before the
/// injection output is observed. Combinations containing them work, but merit
/// a warning.
const DIFFICULT_KEYS: [evdev::Key; 6] = [
    evdev::Key::KEY_LEFTSHIFT,
    evdev::Key::KEY_RIGHTSHIFT,
    evdev::Key::KEY_LEFTCTRL,
    evdev::Key::KEY_RIGHTCTRL,
    evdev::Key::KEY_LEFTALT,
    evdev::Key::KEY_RIGHTALT,
];

/// One or multiple input events used as a unique identifier for mappings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputCombination(Vec<InputEvent>);

impl InputCombination {
    /// Build from events. Fails on an empty list.
    pub fn new(events: Vec<InputEvent>) -> Result<Self> {
        if events.is_empty() {
            return Err(Error::InvalidCombination(String::new()));
        }
        Ok(Self(events))
    }

    /// A combination of a single event.
    pub fn single(event: InputEvent) -> Self {
        Self(vec![event])
    }

    /// Parse the surface form `"t1,c1,v1+t2,c2,v2"`.
    pub fn parse(s: &str) -> Result<Self> {
        let events = s
            .split('+')
            .map(InputEvent::parse)
            .collect::<Result<Vec<_>>>()
            .map_err(|_| Error::InvalidCombination(s.to_string()))?;
        Self::new(events).map_err(|_| Error::InvalidCombination(s.to_string()))
    }

    /// The surface form; inverse of [`InputCombination::parse`].
    pub fn json_key(&self) -> String {
        let parts: Vec<String> = self.0.iter().map(InputEvent::json_key).collect();
        parts.join("+")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false // the constructor rejects empty combinations
    }

    /// More than one event makes this a chord.
    #[inline]
    pub fn is_chord(&self) -> bool {
        self.0.len() > 1
    }

    /// The triggering event (the chord is filed under its `(type, code)`).
    #[inline]
    pub fn last(&self) -> &InputEvent {
        self.0.last().expect("combinations are non-empty")
    }

    #[inline]
    pub fn events(&self) -> &[InputEvent] {
        &self.0
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, InputEvent> {
        self.0.iter()
    }

    #[inline]
    pub fn contains(&self, event: &InputEvent) -> bool {
        self.0.contains(event)
    }

    /// Whether any member includes left/right ctrl/shift/alt.
    ///
    /// Such combinations are allowed but warned about: the host interprets
    /// those modifiers on the forward output as well.
    pub fn is_problematic(&self) -> bool {
        if self.0.len() <= 1 {
            return false;
        }
        self.0.iter().any(|event| {
            event.ev_type == ev::EV_KEY && DIFFICULT_KEYS.iter().any(|k| k.code() == event.code)
        })
    }

    /// Whether any member is configured as an analog input (axis, value 0).
    pub fn has_analog_input(&self) -> bool {
        self.0.iter().any(InputEvent::defines_analog_input)
    }

    /// The first event configured as analog, optionally filtered by type.
    pub fn find_analog_input(&self, ev_type: Option<u16>) -> Option<&InputEvent> {
        self.0.iter().find(|event| {
            event.defines_analog_input() && ev_type.map_or(true, |t| event.ev_type == t)
        })
    }

    /// All orderings that keep the last (triggering) event fixed.
    ///
    /// Pressing a chord as `a+b+c` or `b+a+c` must behave the same, so the
    /// graph builder registers every permutation. Combinations of length one
    /// or two only have themselves.
    pub fn permutations(&self) -> Vec<InputCombination> {
        if self.0.len() <= 2 {
            return vec![self.clone()];
        }

        let mut head: Vec<InputEvent> = self.0[..self.0.len() - 1].to_vec();
        let last = *self.last();
        let mut out = Vec::new();
        permute(&mut head, 0, &mut |p| {
            let mut events = p.to_vec();
            events.push(last);
            out.push(InputCombination(events));
        });
        out
    }
}

/// Heap-style in-place permutation of `events[k..]`.
fn permute(events: &mut [InputEvent], k: usize, visit: &mut impl FnMut(&[InputEvent])) {
    if k == events.len() {
        visit(events);
        return;
    }
    for i in k..events.len() {
        events.swap(k, i);
        permute(events, k + 1, visit);
        events.swap(k, i);
    }
}

impl fmt::Display for InputCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", parts.join(" + "))
    }
}

impl Serialize for InputCombination {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.json_key())
    }
}

impl<'de> Deserialize<'de> for InputCombination {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> core::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        InputCombination::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: u16) -> InputEvent {
        InputEvent::new(ev::EV_KEY, code, 1)
    }

    #[test]
    fn surface_form_round_trips() {
        let combi = InputCombination::parse("1,29,1+1,30,1+3,0,0").unwrap();
        assert_eq!(combi.len(), 3);
        assert_eq!(combi.json_key(), "1,29,1+1,30,1+3,0,0");
        assert_eq!(InputCombination::parse(&combi.json_key()).unwrap(), combi);
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert!(InputCombination::parse("").is_err());
        assert!(InputCombination::parse("1,30").is_err());
        assert!(InputCombination::new(vec![]).is_err());
    }

    #[test]
    fn permutations_fix_the_last_event() {
        let combi =
            InputCombination::new(vec![key(29), key(30), key(31), key(32)]).unwrap();
        let perms = combi.permutations();
        // (n - 1)! orderings for n members
        assert_eq!(perms.len(), 6);
        for p in &perms {
            assert_eq!(p.last(), combi.last());
            assert_eq!(p.len(), combi.len());
        }
        // all distinct
        let unique: std::collections::HashSet<String> =
            perms.iter().map(|p| p.json_key()).collect();
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn short_combinations_have_one_permutation() {
        let combi = InputCombination::new(vec![key(29), key(30)]).unwrap();
        assert_eq!(combi.permutations(), vec![combi.clone()]);
    }

    #[test]
    fn problematic_needs_a_modifier_and_a_chord() {
        let ctrl = key(evdev::Key::KEY_LEFTCTRL.code());
        assert!(!InputCombination::single(ctrl).is_problematic());

        let chord = InputCombination::new(vec![ctrl, key(30)]).unwrap();
        assert!(chord.is_problematic());

        let plain = InputCombination::new(vec![key(29), key(30)]).unwrap();
        assert!(!plain.is_problematic());
    }

    #[test]
    fn finds_analog_member() {
        let combi = InputCombination::parse("1,29,1+3,0,0").unwrap();
        assert!(combi.has_analog_input());
        let analog = combi.find_analog_input(Some(ev::EV_ABS)).unwrap();
        assert_eq!(analog.type_and_code(), (ev::EV_ABS, 0));
        assert!(combi.find_analog_input(Some(ev::EV_REL)).is_none());
    }
}
