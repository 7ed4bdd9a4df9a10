//! Press/release leaf.

use std::rc::Rc;

use log::warn;

use super::{EventHandler, HandlerKind, NotifyArgs};
use crate::combination::InputCombination;
use crate::event::InputEvent;
use crate::outputs::VirtualOutputs;

/// Writes a single key to a virtual output: value 1 presses, value 0
/// releases. Idempotent, so a replayed press or a reset never double-writes.
pub struct KeyHandler {
    combination: InputCombination,
    outputs: Rc<VirtualOutputs>,
    target: String,
    code: u16,
    pressed: bool,
}

impl KeyHandler {
    pub fn new(
        combination: InputCombination,
        outputs: Rc<VirtualOutputs>,
        target: &str,
        code: u16,
    ) -> Self {
        Self {
            combination,
            outputs,
            target: target.to_string(),
            code,
            pressed: false,
        }
    }
}

impl EventHandler for KeyHandler {
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        if args.suppress {
            return false;
        }

        let press = event.value == 1;
        if press == self.pressed {
            // key repeats and replays collapse into the existing state
            return true;
        }

        let value = i32::from(press);
        match self
            .outputs
            .write((crate::event::ev::EV_KEY, self.code, value), &self.target)
        {
            Ok(()) => {
                self.pressed = press;
                true
            }
            Err(error) => {
                warn!("{}: {error}", self.label());
                false
            }
        }
    }

    fn reset(&mut self) {
        if self.pressed {
            let _ = self
                .outputs
                .write((crate::event::ev::EV_KEY, self.code, 0), &self.target);
            self.pressed = false;
        }
    }

    fn wrap_with(&self) -> Vec<(InputCombination, HandlerKind)> {
        vec![(self.combination.clone(), HandlerKind::Combination)]
    }

    fn handled_events(&self) -> Vec<InputEvent> {
        // always behind a CombinationHandler, never in the dispatch index
        Vec::new()
    }

    fn label(&self) -> String {
        format!("KeyHandler to {} on \"{}\"", self.code, self.target)
    }
}
