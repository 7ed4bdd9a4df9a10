//! Swallow events on purpose.

use super::{occlude, EventHandler, HandlerKind, NotifyArgs};
use crate::combination::InputCombination;
use crate::event::InputEvent;

/// Claims events and does nothing: the handler behind a mapping whose output
/// symbol is `disable`. Grabbing plus a NullHandler is how a key is removed
/// from a device without the host ever seeing it.
pub struct NullHandler {
    combination: InputCombination,
    handled: Vec<InputEvent>,
}

impl NullHandler {
    pub fn new(combination: InputCombination) -> Self {
        let handled = combination.events().to_vec();
        Self {
            combination,
            handled,
        }
    }

    fn has_key_members(&self) -> bool {
        self.combination.iter().any(|event| event.value != 0)
    }
}

impl EventHandler for NullHandler {
    fn notify(&mut self, _event: &InputEvent, _args: &NotifyArgs<'_>) -> bool {
        true
    }

    fn reset(&mut self) {}

    fn wrap_with(&self) -> Vec<(InputCombination, HandlerKind)> {
        if self.has_key_members() {
            vec![(self.combination.clone(), HandlerKind::Combination)]
        } else {
            // a disabled analog axis claims its events directly
            Vec::new()
        }
    }

    fn needs_ranking(&self) -> bool {
        self.has_key_members()
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

    fn handled_events(&self) -> Vec<InputEvent> {
        if self.has_key_members() {
            // behind a CombinationHandler
            Vec::new()
        } else {
            self.handled.clone()
        }
    }

    fn occlude_input_event(&mut self, event: &InputEvent) {
        occlude(&mut self.handled, event);
    }

    fn label(&self) -> String {
        format!("NullHandler for {}", self.combination)
    }
}
