//! The event-handler graph.
//!
//! Every node of the injection pipeline implements [`EventHandler`]: it
//! receives an event and either claims it (producing output somewhere down
//! its chain) or declines. Wiring-time introspection — [`EventHandler::wrap_with`],
//! [`EventHandler::needs_ranking`] and friends — is how the
//! [graph builder](crate::handlers::parser) turns flat mappings into chains:
//!
//! - a key mapping becomes `CombinationHandler → KeyHandler`,
//! - an axis-as-button member inserts an `AbsToBtnHandler`/`RelToBtnHandler`
//!   in front of the combination,
//! - an axis mapping with extra trigger keys becomes
//!   `CombinationHandler → AxisSwitchHandler → <axis handler>`,
//! - several chords ending on the same key share a [`HierarchyHandler`].
//!
//! Handlers are linked with `Rc<RefCell<…>>`: the graph is a tree (no parent
//! pointers), lives on the injector's single-threaded loop, and spawned
//! helper tasks (debounced releases, recenter loops, macros) keep their own
//! clones of the links they need.

pub mod abs_to_abs;
pub mod abs_to_btn;
pub mod abs_to_rel;
pub mod axis_switch;
pub mod combination;
pub mod hierarchy;
pub mod key;
pub mod macro_handler;
pub mod null;
pub mod parser;
pub mod rel_to_abs;
pub mod rel_to_btn;
pub mod rel_to_rel;

pub use parser::{build_handler_graph, HandlerGraph};

use std::cell::RefCell;
use std::rc::Rc;

use crate::combination::InputCombination;
use crate::context::EventSource;
use crate::event::InputEvent;
use crate::outputs::ForwardOutput;

/// A handler node shared between the dispatch index, wrapping handlers and
/// the background tasks they spawn.
pub type SharedHandler = Rc<RefCell<dyn EventHandler>>;

/// The wrapper kinds [`EventHandler::wrap_with`] can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Threshold an absolute axis into press/release.
    AbsToBtn,
    /// Debounce a relative axis into press/release.
    RelToBtn,
    /// Track a chord and gate the sub-handler.
    Combination,
    /// Gate an axis chain behind trigger keys.
    AxisSwitch,
}

/// Everything a handler may touch while processing one event.
///
/// `source` and `forward` belong to the reader that dispatched the event;
/// handlers that schedule work for later clone what they need out of here.
pub struct NotifyArgs<'a> {
    /// The device the event came from.
    pub source: &'a Rc<EventSource>,
    /// The forward output of that device.
    pub forward: &'a ForwardOutput,
    /// Update state, but do not produce output.
    pub suppress: bool,
}

impl<'a> NotifyArgs<'a> {
    pub fn new(source: &'a Rc<EventSource>, forward: &'a ForwardOutput) -> Self {
        Self {
            source,
            forward,
            suppress: false,
        }
    }

    /// The same args with `suppress` set.
    pub fn suppressed(&self) -> NotifyArgs<'a> {
        NotifyArgs {
            source: self.source,
            forward: self.forward,
            suppress: true,
        }
    }
}

/// The protocol every node of the event pipeline implements.
pub trait EventHandler {
    /// Handle one event. Returns `true` iff the event was claimed.
    ///
    /// A claiming handler owns the event's effect; callers stop looking for
    /// an owner but may keep notifying others with `suppress = true` so they
    /// can track state.
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool;

    /// Return to neutral: release held outputs, recenter axes, stop loops.
    /// Must be idempotent.
    fn reset(&mut self);

    /// Wrapping requests: `(combination, wrapper kind)` pairs, outermost
    /// layers created from the result of the previous one.
    fn wrap_with(&self) -> Vec<(InputCombination, HandlerKind)> {
        Vec::new()
    }

    /// Whether this handler must be wrapped before it can join the graph.
    fn needs_wrapping(&self) -> bool {
        !self.wrap_with().is_empty()
    }

    /// Whether chords sharing a trigger key must be ranked against this one.
    fn needs_ranking(&self) -> bool {
        false
    }

    /// The combination this handler competes with when ranked.
    fn rank_by(&self) -> Option<InputCombination> {
        None
    }

    /// Attach the sub-handler this node forwards into. Handlers without a
    /// sub-handler ignore the call.
    fn set_sub_handler(&mut self, _handler: SharedHandler) {}

    /// The events this node consumes straight from the dispatch index.
    fn handled_events(&self) -> Vec<InputEvent>;

    /// An outer wrapper took over this event; stop listening for it.
    fn occlude_input_event(&mut self, _event: &InputEvent) {}

    /// Short label for logs.
    fn label(&self) -> String;
}

/// Remove `event` from a handled-events list; shared by the handler impls.
pub(crate) fn occlude(handled: &mut Vec<InputEvent>, event: &InputEvent) {
    handled.retain(|e| e != event);
}

/// Scale a value in `[-1, 1]` onto an absolute-axis range; inputs beyond ±1
/// clamp to the range ends.
pub(crate) fn scale_to_range(x: f64, range: crate::outputs::AbsRange) -> i32 {
    let factor = f64::from(range.max - range.min) / 2.0;
    let offset = f64::from(range.min) + factor;
    let y = factor * x + offset;
    y.clamp(f64::from(range.min), f64::from(range.max)) as i32
}
