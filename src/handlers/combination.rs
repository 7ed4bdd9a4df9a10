//! Chord tracking.

use std::collections::HashMap;

use log::debug;

use super::{occlude, EventHandler, HandlerKind, NotifyArgs, SharedHandler};
use crate::combination::InputCombination;
use crate::event::{ev, EventActions, InputEvent};

/// Tracks which members of a combination are currently active and notifies
/// the sub-handler on the transitions.
///
/// Key-like members (value ≠ 0) contribute to the pressed map; at most one
/// axis member (value = 0) passes through to the sub-handler while the
/// combination is active. When the chord activates, synthesized release
/// events for the key members go to the forward output so the host never
/// believes they stayed held.
pub struct CombinationHandler {
    combination: InputCombination,
    pressed: HashMap<(u16, u16), bool>,
    map_axis: Option<(u16, u16)>,
    last_active: bool,
    sub: Option<SharedHandler>,
    handled: Vec<InputEvent>,
}

impl CombinationHandler {
    pub fn new(combination: InputCombination) -> Self {
        let mut pressed = HashMap::new();
        let mut map_axis = None;
        for event in combination.iter() {
            if event.value != 0 {
                pressed.insert(event.type_and_code(), false);
            } else {
                // at most one axis can pass through
                debug_assert!(map_axis.is_none());
                map_axis = Some(event.type_and_code());
            }
        }
        debug_assert!(!pressed.is_empty());

        let handled = combination.events().to_vec();
        Self {
            combination,
            pressed,
            map_axis,
            last_active: false,
            sub: None,
            handled,
        }
    }

    fn active(&self) -> bool {
        self.pressed.values().all(|pressed| *pressed)
    }

    /// Synthesized key-up events for every key member, on the forward output.
    ///
    /// Duplicate key-up events are ignored by evdev, so this is safe even if
    /// a member was already released.
    fn forward_release(&self, args: &NotifyArgs<'_>) {
        if !self.combination.is_chord() {
            return;
        }
        for event in self.combination.iter() {
            if event.ev_type == ev::EV_KEY {
                args.forward.write(event.ev_type, event.code, 0);
            }
        }
    }

    fn notify_sub(&self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        match &self.sub {
            Some(sub) => sub.borrow_mut().notify(event, args),
            None => false,
        }
    }
}

impl EventHandler for CombinationHandler {
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        let type_code = event.type_and_code();
        let is_axis_passthrough =
            self.map_axis == Some(type_code) && !event.actions.contains(EventActions::AS_KEY);

        if !self.pressed.contains_key(&type_code) && !is_axis_passthrough {
            return false;
        }

        if is_axis_passthrough {
            return if self.last_active {
                self.notify_sub(event, args)
            } else {
                // combination inactive: give the event back
                false
            };
        }

        self.pressed.insert(type_code, event.value == 1);
        if self.active() == self.last_active {
            return false;
        }

        if self.active() && event.value == 1 {
            // keep the host from seeing the chord as held keys
            self.forward_release(args);
        }

        if args.suppress {
            // track only; the transition itself is not ours to emit
            self.last_active = self.active();
            return false;
        }

        if self.active() && event.value == 1 {
            self.last_active = true;
            if self.map_axis.is_some() {
                debug!("combination {} activated", self.combination);
                return true;
            }
            debug!("combination {} triggered", self.combination);
            return self.notify_sub(&event.with_value(1), args);
        }

        self.last_active = false;
        if let Some((axis_type, axis_code)) = self.map_axis {
            // mapping to an axis: ask downstream to return to neutral instead
            // of forwarding a value-0 through
            debug!("combination {} deactivated", self.combination);
            let recenter =
                InputEvent::new(axis_type, axis_code, 0).with_actions(EventActions::RECENTER);
            self.notify_sub(&recenter, args);
            return true;
        }
        self.notify_sub(&event.with_value(0), args)
    }

    fn reset(&mut self) {
        for pressed in self.pressed.values_mut() {
            *pressed = false;
        }
        self.last_active = false;
        if let Some(sub) = &self.sub {
            sub.borrow_mut().reset();
        }
    }

    fn wrap_with(&self) -> Vec<(InputCombination, HandlerKind)> {
        let mut wraps = Vec::new();
        for event in self.combination.iter() {
            if event.value != 0 {
                match event.ev_type {
                    ev::EV_ABS => {
                        wraps.push((InputCombination::single(*event), HandlerKind::AbsToBtn));
                    }
                    ev::EV_REL => {
                        wraps.push((InputCombination::single(*event), HandlerKind::RelToBtn));
                    }
                    _ => {}
                }
            }
        }
        wraps
    }

    fn needs_ranking(&self) -> bool {
        true
    }

    fn rank_by(&self) -> Option<InputCombination> {
        let keys: Vec<InputEvent> = self
            .combination
            .iter()
            .filter(|event| event.value != 0)
            .copied()
            .collect();
        InputCombination::new(keys).ok()
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
        format!("CombinationHandler for {}", self.combination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventSource;
    use crate::handlers::key::KeyHandler;
    use crate::outputs::{Capabilities, ForwardOutput, OutputKind, RecordingSink, VirtualOutputs};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fixture(
        combination: &str,
    ) -> (
        CombinationHandler,
        RecordingSink,
        RecordingSink,
        Rc<EventSource>,
        ForwardOutput,
    ) {
        let sink = RecordingSink::new();
        let mut outputs = VirtualOutputs::new();
        outputs.register("keyboard", OutputKind::Keyboard.template(), Box::new(sink.clone()));
        let combination = InputCombination::parse(combination).unwrap();

        let key = KeyHandler::new(combination.clone(), Rc::new(outputs), "keyboard", 44);
        let mut handler = CombinationHandler::new(combination);
        handler.set_sub_handler(Rc::new(RefCell::new(key)));

        let forward_sink = RecordingSink::new();
        let forward = ForwardOutput::from_sink("test", Box::new(forward_sink.clone()));
        let source = Rc::new(EventSource {
            path: "/dev/input/event0".into(),
            name: "test".into(),
            capabilities: Capabilities::default(),
            is_gamepad: false,
        });
        (handler, sink, forward_sink, source, forward)
    }

    #[test]
    fn fires_on_full_chord_and_suppresses_leakage() {
        let (mut handler, sink, forward_sink, source, forward) = fixture("1,29,1+1,30,1");
        let args = NotifyArgs::new(&source, &forward);

        assert!(!handler.notify(&InputEvent::new(ev::EV_KEY, 29, 1), &args));
        assert!(handler.notify(&InputEvent::new(ev::EV_KEY, 30, 1), &args));
        assert_eq!(sink.events(), vec![(ev::EV_KEY, 44, 1)]);
        // both members released on the forward output at activation
        assert_eq!(
            forward_sink.events(),
            vec![(ev::EV_KEY, 29, 0), (ev::EV_KEY, 30, 0)]
        );

        assert!(handler.notify(&InputEvent::new(ev::EV_KEY, 30, 0), &args));
        assert_eq!(sink.events(), vec![(ev::EV_KEY, 44, 1), (ev::EV_KEY, 44, 0)]);
        assert!(!handler.notify(&InputEvent::new(ev::EV_KEY, 29, 0), &args));
    }

    #[test]
    fn ignores_foreign_events() {
        let (mut handler, _, _, source, forward) = fixture("1,29,1+1,30,1");
        let args = NotifyArgs::new(&source, &forward);
        assert!(!handler.notify(&InputEvent::new(ev::EV_KEY, 31, 1), &args));
    }

    #[test]
    fn suppressed_transitions_track_but_do_not_emit() {
        let (mut handler, sink, _, source, forward) = fixture("1,29,1+1,30,1");
        let args = NotifyArgs::new(&source, &forward);
        let suppressed = args.suppressed();

        assert!(!handler.notify(&InputEvent::new(ev::EV_KEY, 29, 1), &suppressed));
        assert!(!handler.notify(&InputEvent::new(ev::EV_KEY, 30, 1), &suppressed));
        assert!(sink.events().is_empty());
        // state tracked: a release is not a new transition
        assert!(!handler.notify(&InputEvent::new(ev::EV_KEY, 30, 1), &args));
    }

    #[test]
    fn single_key_combination_does_not_forward_releases() {
        let (mut handler, sink, forward_sink, source, forward) = fixture("1,30,1");
        let args = NotifyArgs::new(&source, &forward);
        assert!(handler.notify(&InputEvent::new(ev::EV_KEY, 30, 1), &args));
        assert!(forward_sink.events().is_empty());
        assert_eq!(sink.events(), vec![(ev::EV_KEY, 44, 1)]);
    }

    #[test]
    fn ranking_uses_key_members() {
        let (handler, ..) = fixture("1,29,1+1,30,1");
        assert!(handler.needs_ranking());
        assert_eq!(handler.rank_by().unwrap().json_key(), "1,29,1+1,30,1");
    }
}
