//! Priority among chords sharing a trigger key.

use super::{EventHandler, NotifyArgs, SharedHandler};
use crate::event::InputEvent;

/// An ordered list of handlers bound to one `(type, code)`.
///
/// The first handler that claims a matching event wins it; every later
/// handler is still notified with `suppress = true` so its combination state
/// stays truthful. The graph builder orders longer combinations first, which
/// is what makes `a+b` shadow plain `b`.
pub struct HierarchyHandler {
    handlers: Vec<SharedHandler>,
    key: (u16, u16),
}

impl HierarchyHandler {
    pub fn new(handlers: Vec<SharedHandler>, key: (u16, u16)) -> Self {
        Self { handlers, key }
    }
}

impl EventHandler for HierarchyHandler {
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        if event.type_and_code() != self.key {
            return false;
        }

        let mut success = false;
        for handler in &self.handlers {
            if !success {
                success = handler.borrow_mut().notify(event, args);
            } else {
                handler.borrow_mut().notify(event, &args.suppressed());
            }
        }
        success
    }

    fn reset(&mut self) {
        for handler in &self.handlers {
            handler.borrow_mut().reset();
        }
    }

    fn handled_events(&self) -> Vec<InputEvent> {
        // registered under its bound key by the graph builder
        Vec::new()
    }

    fn label(&self) -> String {
        format!(
            "HierarchyHandler for ({}, {}) with {} handlers",
            self.key.0,
            self.key.1,
            self.handlers.len()
        )
    }
}
