//! Numlock preservation around grabbing.
//!
//! Grabbing a keyboard tends to toggle the numlock state on some systems.
//! The injector remembers the LED state before grabbing and, if it changed,
//! taps `KEY_NUMLOCK` on the keyboard output to restore it.

use log::debug;

use crate::event::ev;
use crate::outputs::VirtualOutputs;

/// Read the numlock LED of a device. `None` when the device has no LEDs.
pub fn read_state(device: &evdev::Device) -> Option<bool> {
    let leds = device.get_led_state().ok()?;
    Some(leds.contains(evdev::LedType::LED_NUML))
}

/// The first known numlock state among the given devices.
pub fn read_group_state<'a>(devices: impl Iterator<Item = &'a evdev::Device>) -> Option<bool> {
    devices.filter_map(read_state).next()
}

/// Tap `KEY_NUMLOCK` on the keyboard output if the state drifted.
pub fn restore(outputs: &VirtualOutputs, before: Option<bool>, after: Option<bool>) {
    let (Some(before), Some(after)) = (before, after) else {
        return;
    };
    if before == after {
        return;
    }
    debug!("restoring numlock to {before}");
    let code = evdev::Key::KEY_NUMLOCK.code();
    // failures only mean there is no keyboard output to tap on
    let _ = outputs.write((ev::EV_KEY, code, 1), "keyboard");
    let _ = outputs.write((ev::EV_KEY, code, 0), "keyboard");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::{OutputKind, RecordingSink};

    fn outputs() -> (VirtualOutputs, RecordingSink) {
        let sink = RecordingSink::new();
        let mut outputs = VirtualOutputs::new();
        outputs.register("keyboard", OutputKind::Keyboard.template(), Box::new(sink.clone()));
        (outputs, sink)
    }

    #[test]
    fn taps_only_when_the_state_drifted() {
        let (outputs, sink) = outputs();
        restore(&outputs, Some(true), Some(true));
        assert!(sink.events().is_empty());

        restore(&outputs, Some(true), Some(false));
        let code = evdev::Key::KEY_NUMLOCK.code();
        assert_eq!(sink.events(), vec![(ev::EV_KEY, code, 1), (ev::EV_KEY, code, 0)]);
    }

    #[test]
    fn unknown_states_are_left_alone() {
        let (outputs, sink) = outputs();
        restore(&outputs, None, Some(true));
        restore(&outputs, Some(true), None);
        assert!(sink.events().is_empty());
    }
}
