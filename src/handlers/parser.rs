//! Assemble the handler graph from a preset.
//!
//! For every mapping a leaf handler is created from its output (key, macro,
//! axis transform, disable), then [`wrap_with`](super::EventHandler::wrap_with)
//! requests are resolved recursively into wrapping layers, and finally
//! handlers competing for the same `(type, code)` are ranked under a
//! [`HierarchyHandler`]. A mapping that fails to assemble is dropped with an
//! error log; the rest of the preset still works.

use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, error};

use super::abs_to_abs::AbsToAbsHandler;
use super::abs_to_btn::AbsToBtnHandler;
use super::abs_to_rel::AbsToRelHandler;
use super::axis_switch::AxisSwitchHandler;
use super::combination::CombinationHandler;
use super::hierarchy::HierarchyHandler;
use super::key::KeyHandler;
use super::macro_handler::MacroHandler;
use super::null::NullHandler;
use super::rel_to_btn::RelToBtnHandler;
use super::rel_to_rel::RelToRelHandler;
use super::{HandlerKind, SharedHandler};
use crate::combination::InputCombination;
use crate::context::SharedContext;
use crate::error::{Error, Result};
use crate::event::ev;
use crate::handlers::rel_to_abs::RelToAbsHandler;
use crate::mapping::Mapping;

use std::cell::RefCell;

/// The per-`(type, code)` dispatch index of one injector.
pub struct HandlerGraph {
    entries: HashMap<(u16, u16), Vec<SharedHandler>>,
}

impl HandlerGraph {
    /// The handlers to try, in order, for events of this `(type, code)`.
    pub fn handlers_for(&self, type_and_code: (u16, u16)) -> Option<&[SharedHandler]> {
        self.entries.get(&type_and_code).map(Vec::as_slice)
    }

    /// All `(type, code)` pairs any mapping cares about.
    pub fn codes(&self) -> impl Iterator<Item = &(u16, u16)> {
        self.entries.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reset every entry chain. Cascades through sub-handlers; handlers
    /// reachable from several entries are reset more than once, which is fine
    /// because reset is idempotent.
    pub fn reset(&self) {
        for handlers in self.entries.values() {
            for handler in handlers {
                handler.borrow_mut().reset();
            }
        }
    }
}

/// Build the graph for the context's preset.
pub fn build_handler_graph(context: &SharedContext) -> HandlerGraph {
    let mut index: HashMap<(u16, u16), Vec<SharedHandler>> = HashMap::new();

    for (_, mapping) in context.preset.iter() {
        match assemble_mapping(mapping, context) {
            Ok(layers) => {
                for layer in layers {
                    for event in layer.borrow().handled_events() {
                        index
                            .entry(event.type_and_code())
                            .or_default()
                            .push(Rc::clone(&layer));
                    }
                }
            }
            Err(e) => {
                // drop this mapping, keep the rest of the preset working
                error!("failed to assemble \"{}\": {e}", mapping.label());
            }
        }
    }

    let entries = index
        .into_iter()
        .map(|(key, handlers)| (key, rank_handlers(key, handlers)))
        .collect();

    HandlerGraph { entries }
}

/// Leaf creation plus recursive wrap resolution. Returns every layer that
/// was created for this mapping.
fn assemble_mapping(mapping: &Mapping, context: &SharedContext) -> Result<Vec<SharedHandler>> {
    mapping.validate(&context.symbols)?;
    let leaf = create_leaf(mapping, context)?;

    let mut layers: Vec<SharedHandler> = vec![Rc::clone(&leaf)];
    let mut frontier: Vec<SharedHandler> = vec![leaf];

    while let Some(current) = frontier.pop() {
        let wraps = current.borrow().wrap_with();
        for (combination, kind) in wraps {
            let wrapper = create_wrapper(kind, &combination, mapping)?;
            wrapper.borrow_mut().set_sub_handler(Rc::clone(&current));
            for event in combination.iter() {
                current.borrow_mut().occlude_input_event(event);
            }
            debug!(
                "wrapped {} with {}",
                current.borrow().label(),
                wrapper.borrow().label()
            );
            layers.push(Rc::clone(&wrapper));
            frontier.push(wrapper);
        }
    }

    Ok(layers)
}

fn create_leaf(mapping: &Mapping, context: &SharedContext) -> Result<SharedHandler> {
    let combination = mapping.event_combination.clone();

    if mapping.is_disabled() {
        return Ok(Rc::new(RefCell::new(NullHandler::new(combination))));
    }

    if mapping.is_macro_output() {
        let symbol = mapping.output_symbol.as_deref().unwrap_or_default();
        let macro_ = crate::macros::parse(symbol, &context.symbols)?;
        macro_.set_keystroke_sleep(context.preset.options.keystroke_sleep_ms);
        macro_.bind_variables(&context.macro_variables);
        return Ok(Rc::new(RefCell::new(MacroHandler::new(
            combination,
            Rc::new(macro_),
            Rc::clone(&context.outputs),
            &mapping.target_uinput,
        ))));
    }

    if let Some(symbol) = &mapping.output_symbol {
        let code = context
            .symbols
            .get(symbol)
            .ok_or_else(|| Error::UnknownSymbol(symbol.clone()))?;
        return Ok(Rc::new(RefCell::new(KeyHandler::new(
            combination,
            Rc::clone(&context.outputs),
            &mapping.target_uinput,
            code,
        ))));
    }

    let analog = combination.find_analog_input(None).map(|e| e.ev_type);
    match (mapping.output_type, analog) {
        (Some(ev::EV_KEY), _) => {
            let code = mapping.output_code.ok_or_else(|| {
                Error::InvalidMapping(format!("\"{}\" has no output code", mapping.label()))
            })?;
            Ok(Rc::new(RefCell::new(KeyHandler::new(
                combination,
                Rc::clone(&context.outputs),
                &mapping.target_uinput,
                code,
            ))))
        }
        (Some(ev::EV_ABS), Some(ev::EV_ABS)) => Ok(Rc::new(RefCell::new(AbsToAbsHandler::new(
            mapping,
            Rc::clone(&context.outputs),
        )?))),
        (Some(ev::EV_ABS), Some(ev::EV_REL)) => Ok(Rc::new(RefCell::new(RelToAbsHandler::new(
            mapping,
            Rc::clone(&context.outputs),
        )?))),
        (Some(ev::EV_REL), Some(ev::EV_ABS)) => Ok(Rc::new(RefCell::new(AbsToRelHandler::new(
            mapping,
            Rc::clone(&context.outputs),
        )?))),
        (Some(ev::EV_REL), Some(ev::EV_REL)) => Ok(Rc::new(RefCell::new(RelToRelHandler::new(
            mapping,
            Rc::clone(&context.outputs),
        )?))),
        (Some(output_type), analog) => Err(Error::InvalidMapping(format!(
            "\"{}\": output type {output_type} does not fit analog input {analog:?}",
            mapping.label()
        ))),
        (None, _) => Err(Error::InvalidMapping(format!(
            "\"{}\" has no output",
            mapping.label()
        ))),
    }
}

fn create_wrapper(
    kind: HandlerKind,
    combination: &InputCombination,
    mapping: &Mapping,
) -> Result<SharedHandler> {
    Ok(match kind {
        HandlerKind::Combination => {
            Rc::new(RefCell::new(CombinationHandler::new(combination.clone())))
        }
        HandlerKind::AxisSwitch => {
            Rc::new(RefCell::new(AxisSwitchHandler::new(combination.clone())))
        }
        HandlerKind::AbsToBtn => Rc::new(RefCell::new(AbsToBtnHandler::new(
            combination.events()[0],
        ))),
        HandlerKind::RelToBtn => Rc::new(RefCell::new(RelToBtnHandler::new(
            combination.events()[0],
            mapping.release_timeout,
        ))),
    })
}

/// Order competing handlers and share a hierarchy among the ranked ones.
///
/// Longer combinations first; within the same length, the combination whose
/// shared event sits at a later index wins. That places `a+b+c` in front of
/// `a+b` in front of `b`, so chords shadow their sub-chords.
fn rank_handlers(key: (u16, u16), handlers: Vec<SharedHandler>) -> Vec<SharedHandler> {
    let (mut ranked, rest): (Vec<SharedHandler>, Vec<SharedHandler>) = handlers
        .into_iter()
        .partition(|handler| handler.borrow().needs_ranking());

    if ranked.len() <= 1 {
        let mut result = ranked;
        result.extend(rest);
        return result;
    }

    let sort_key = |handler: &SharedHandler| -> (usize, usize) {
        let rank_by = handler.borrow().rank_by();
        let Some(combination) = rank_by else {
            return (0, 0);
        };
        let index_of_key = combination
            .iter()
            .position(|event| event.type_and_code() == key)
            .unwrap_or(0);
        (combination.len(), index_of_key)
    };
    // descending on both
    ranked.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));

    let hierarchy: SharedHandler = Rc::new(RefCell::new(HierarchyHandler::new(ranked, key)));
    let mut result = vec![hierarchy];
    result.extend(rest);
    result
}
