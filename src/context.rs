//! Per-injector shared state.
//!
//! One [`Context`] exists per injector process. Handlers receive an
//! `Rc<Context>` at wiring time and reach the preset, the virtual outputs,
//! the per-source forward outputs and the macro variable store through it.
//! Everything lives on the injector's single-threaded loop, so interior
//! mutability is plain `RefCell`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::event::InputEvent;
use crate::macros::MacroVariables;
use crate::outputs::{AbsRange, Capabilities, ForwardOutput, VirtualOutputs};
use crate::preset::Preset;
use crate::symbols::SymbolTable;

/// Shared, read-mostly injector state.
pub type SharedContext = Rc<Context>;

/// Identity and capability snapshot of one grabbed source device.
///
/// Handlers use it for absinfo introspection; it is captured when the reader
/// starts so notify paths never touch the kernel.
#[derive(Debug, Clone)]
pub struct EventSource {
    /// Kernel event path, e.g. `/dev/input/event3`.
    pub path: String,
    /// Device name as reported by the kernel.
    pub name: String,
    /// Capabilities including absolute-axis ranges.
    pub capabilities: Capabilities,
    /// Whether the device classified as a gamepad.
    pub is_gamepad: bool,
}

impl EventSource {
    /// Absinfo of one of the source's absolute axes.
    pub fn absinfo(&self, code: u16) -> Option<AbsRange> {
        self.capabilities.abs.get(&code).copied()
    }
}

/// Trait for reacting to raw input events from any source of the injector.
///
/// All dispatch traffic additionally fans out to registered listeners,
/// regardless of whether a handler claimed the event.
pub trait InputListener {
    fn on_input(&mut self, event: &InputEvent);
}

/// Registered listeners, keyed by a handle for later removal.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    listeners: HashMap<u64, Box<dyn InputListener>>,
}

impl Listeners {
    pub fn add(&mut self, listener: impl InputListener + 'static) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, Box::new(listener));
        id
    }

    pub fn remove(&mut self, id: u64) {
        self.listeners.remove(&id);
    }

    pub fn emit(&mut self, event: &InputEvent) {
        for listener in self.listeners.values_mut() {
            listener.on_input(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Per-injector shared state visible to handlers and readers.
pub struct Context {
    /// The assembled preset.
    pub preset: Preset,
    /// The key-name snapshot used to resolve symbols and macros.
    pub symbols: SymbolTable,
    /// The named virtual outputs handlers write to.
    pub outputs: Rc<VirtualOutputs>,
    /// Forward output per source path, registered by the readers.
    pub forward_outputs: RefCell<HashMap<String, ForwardOutput>>,
    /// The store behind macro `set`/`ifeq`.
    pub macro_variables: MacroVariables,
    /// Listener fan-out for anything that must see all input.
    pub listeners: RefCell<Listeners>,
}

impl Context {
    pub fn new(preset: Preset, symbols: SymbolTable, outputs: Rc<VirtualOutputs>) -> SharedContext {
        Rc::new(Self {
            preset,
            symbols,
            outputs,
            forward_outputs: RefCell::new(HashMap::new()),
            macro_variables: Rc::new(RefCell::new(HashMap::new())),
            listeners: RefCell::new(Listeners::default()),
        })
    }

    /// Register the forward output of a source path.
    pub fn set_forward_output(&self, path: &str, forward: ForwardOutput) {
        self.forward_outputs
            .borrow_mut()
            .insert(path.to_string(), forward);
    }

    pub fn forward_output(&self, path: &str) -> Option<ForwardOutput> {
        self.forward_outputs.borrow().get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ev;

    struct Recorder(Rc<RefCell<Vec<InputEvent>>>);

    impl InputListener for Recorder {
        fn on_input(&mut self, event: &InputEvent) {
            self.0.borrow_mut().push(*event);
        }
    }

    #[test]
    fn listeners_receive_events_until_removed() {
        let seen: Rc<RefCell<Vec<InputEvent>>> = Rc::default();
        let mut listeners = Listeners::default();
        let id = listeners.add(Recorder(Rc::clone(&seen)));

        listeners.emit(&InputEvent::new(ev::EV_KEY, 30, 1));
        assert_eq!(seen.borrow().len(), 1);

        listeners.remove(id);
        listeners.emit(&InputEvent::new(ev::EV_KEY, 30, 0));
        assert_eq!(seen.borrow().len(), 1);
    }
}
