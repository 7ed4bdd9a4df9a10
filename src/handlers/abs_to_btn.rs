//! Absolute axis → button threshold.

use log::debug;

use super::{occlude, EventHandler, NotifyArgs, SharedHandler};
use crate::event::{EventActions, InputEvent};
use crate::outputs::AbsRange;

/// Turns crossings of a trigger point on an absolute axis into press/release
/// events for the sub-handler.
///
/// The trigger percent is signed: `+p` fires above
/// `midpoint + half_range·p/100`, `-p` fires below it. Hats (range `[-1, 1]`)
/// trigger at 0 either way.
pub struct AbsToBtnHandler {
    event: InputEvent,
    trigger_percent: i32,
    active: bool,
    sub: Option<SharedHandler>,
    handled: Vec<InputEvent>,
}

impl AbsToBtnHandler {
    /// `event` is the bound member; its value is the trigger percent
    /// (validated to ±99, non-zero, by the mapping surface).
    pub fn new(event: InputEvent) -> Self {
        debug_assert!((-99..=99).contains(&event.value) && event.value != 0);
        Self {
            event,
            trigger_percent: event.value,
            active: false,
            sub: None,
            handled: vec![event],
        }
    }

    fn trigger_point(&self, absinfo: AbsRange) -> i32 {
        if (absinfo.min, absinfo.max) == (-1, 1) {
            // hat switch
            return 0;
        }
        let half_range = f64::from(absinfo.max - absinfo.min) / 2.0;
        let middle = half_range + f64::from(absinfo.min);
        (middle + half_range * f64::from(self.trigger_percent) / 100.0) as i32
    }
}

impl EventHandler for AbsToBtnHandler {
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        if event.type_and_code() != self.event.type_and_code() {
            return false;
        }

        let absinfo = args
            .source
            .absinfo(event.code)
            .unwrap_or(AbsRange::new(-1, 1));
        let trigger_point = self.trigger_point(absinfo);

        let ev_active = if self.trigger_percent > 0 {
            event.value > trigger_point
        } else {
            event.value < trigger_point
        };

        if ev_active == self.active {
            return true;
        }
        self.active = ev_active;

        let value = i32::from(ev_active);
        debug!("{}: sending {value} to sub-handler", self.label());
        let key_event = event.with_value(value).with_actions(EventActions::AS_KEY);
        match &self.sub {
            Some(sub) => sub.borrow_mut().notify(&key_event, args),
            None => false,
        }
    }

    fn reset(&mut self) {
        self.active = false;
        if let Some(sub) = &self.sub {
            sub.borrow_mut().reset();
        }
    }

    fn set_sub_handler(&mut self, handler: SharedHandler) {
        self.sub = Some(handler);
    }

    fn handled_events(&self) -> Vec<InputEvent> {
        self.handled.clone()
    }

    fn occlude_input_event(&mut self, event: &InputEvent) {
        occlude(&mut self.handled, event);
    }

    fn label(&self) -> String {
        format!(
            "AbsToBtnHandler for ({}, {}) at {}%",
            self.event.ev_type, self.event.code, self.trigger_percent
        )
    }
}
