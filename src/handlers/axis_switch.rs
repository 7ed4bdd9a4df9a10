//! Gate an axis chain behind trigger keys.

use std::rc::Rc;

use log::debug;

use super::{occlude, EventHandler, HandlerKind, NotifyArgs, SharedHandler};
use crate::combination::InputCombination;
use crate::context::EventSource;
use crate::event::{ev, EventActions, InputEvent};
use crate::outputs::ForwardOutput;

/// Enables or disables the wrapped axis handler.
///
/// Used for combinations like `BTN_SIDE + ABS_X`: the axis only drives the
/// output while the trigger keys are held. Turning off sends a recenter
/// downstream; turning an absolute axis back on replays the last cached
/// value so the output snaps to the real stick position.
pub struct AxisSwitchHandler {
    combination: InputCombination,
    map_axis: (u16, u16),
    trigger_keys: Vec<(u16, u16)>,
    active: bool,
    last_value: i32,
    axis_source: Option<Rc<EventSource>>,
    forward: Option<ForwardOutput>,
    sub: Option<SharedHandler>,
    handled: Vec<InputEvent>,
}

impl AxisSwitchHandler {
    pub fn new(combination: InputCombination) -> Self {
        let map_axis = combination
            .find_analog_input(None)
            .expect("axis switch needs an analog member")
            .type_and_code();
        let trigger_keys: Vec<(u16, u16)> = combination
            .iter()
            .filter(|event| event.value != 0)
            .map(InputEvent::type_and_code)
            .collect();
        debug_assert!(!trigger_keys.is_empty());

        let handled = combination.events().to_vec();
        Self {
            map_axis,
            trigger_keys,
            combination,
            active: false,
            last_value: 0,
            axis_source: None,
            forward: None,
            sub: None,
            handled,
        }
    }

    fn notify_sub(&self, event: &InputEvent) -> bool {
        let (Some(sub), Some(source), Some(forward)) =
            (&self.sub, &self.axis_source, &self.forward)
        else {
            // no axis event seen yet, nothing to switch
            return false;
        };
        let args = NotifyArgs::new(source, forward);
        sub.borrow_mut().notify(event, &args)
    }
}

impl EventHandler for AxisSwitchHandler {
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        let type_code = event.type_and_code();
        let is_trigger = self.trigger_keys.contains(&type_code) && type_code != self.map_axis;

        if !is_trigger && type_code != self.map_axis {
            return false;
        }

        if is_trigger {
            let active = event.value == 1;
            if self.active == active {
                return false;
            }
            self.active = active;

            if !active {
                debug!("{}: stopping axis", self.label());
                let (axis_type, axis_code) = self.map_axis;
                let recenter =
                    InputEvent::new(axis_type, axis_code, 0).with_actions(EventActions::RECENTER);
                self.notify_sub(&recenter);
            } else if self.map_axis.0 == ev::EV_ABS {
                // snap the output to where the stick actually is
                debug!("{}: starting axis", self.label());
                let (axis_type, axis_code) = self.map_axis;
                let replay = InputEvent::new(axis_type, axis_code, self.last_value);
                self.notify_sub(&replay);
            } else {
                debug!("{}: starting axis", self.label());
            }
            return true;
        }

        // cache for the synthetic recenter and replay events
        self.axis_source = Some(Rc::clone(args.source));
        self.forward = Some(args.forward.clone());
        self.last_value = event.value;

        if self.active {
            let Some(sub) = &self.sub else { return false };
            return sub.borrow_mut().notify(event, args);
        }
        false
    }

    fn reset(&mut self) {
        self.active = false;
        self.last_value = 0;
        if let Some(sub) = &self.sub {
            sub.borrow_mut().reset();
        }
    }

    fn wrap_with(&self) -> Vec<(InputCombination, HandlerKind)> {
        let keys: Vec<InputEvent> = self
            .combination
            .iter()
            .filter(|event| event.value != 0)
            .copied()
            .collect();
        match InputCombination::new(keys) {
            Ok(combination) => vec![(combination, HandlerKind::Combination)],
            Err(_) => Vec::new(),
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
        format!("AxisSwitchHandler for {}", self.combination)
    }
}
