//! Trigger a macro from the graph.

use std::rc::Rc;

use log::{debug, error};

use super::{EventHandler, HandlerKind, NotifyArgs};
use crate::combination::InputCombination;
use crate::event::InputEvent;
use crate::macros::Macro;
use crate::outputs::VirtualOutputs;

/// Runs the compiled macro while its trigger is active.
///
/// Value 1 sets the macro's held state and starts a run unless one is in
/// flight; value 0 clears the held state, which ends `h()` blocks and cuts
/// waits short. A run-time failure of one macro never disturbs the rest of
/// the graph: the writer only logs.
pub struct MacroHandler {
    combination: InputCombination,
    macro_: Rc<Macro>,
    outputs: Rc<VirtualOutputs>,
    target: String,
}

impl MacroHandler {
    pub fn new(
        combination: InputCombination,
        macro_: Rc<Macro>,
        outputs: Rc<VirtualOutputs>,
        target: &str,
    ) -> Self {
        Self {
            combination,
            macro_,
            outputs,
            target: target.to_string(),
        }
    }
}

impl EventHandler for MacroHandler {
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        if args.suppress {
            return false;
        }

        if event.value == 1 {
            self.macro_.press_trigger();
            if self.macro_.is_running() {
                return true;
            }

            let macro_ = Rc::clone(&self.macro_);
            let outputs = Rc::clone(&self.outputs);
            let target = self.target.clone();
            tokio::task::spawn_local(async move {
                let macro_for_writer = Rc::clone(&macro_);
                let writer = move |ev_type: u16, code: u16, value: i32| {
                    debug!("macro writes ({ev_type}, {code}, {value}) to \"{target}\"");
                    if let Err(e) = outputs.write((ev_type, code, value), &target) {
                        error!("macro \"{}\" failed: {e}", macro_for_writer.source());
                    }
                };
                macro_.run(&writer).await;
            });
            true
        } else {
            if self.macro_.is_holding() {
                self.macro_.release_trigger();
            }
            true
        }
    }

    fn reset(&mut self) {
        if self.macro_.is_holding() {
            self.macro_.release_trigger();
        }
    }

    fn wrap_with(&self) -> Vec<(InputCombination, HandlerKind)> {
        vec![(self.combination.clone(), HandlerKind::Combination)]
    }

    fn handled_events(&self) -> Vec<InputEvent> {
        // always behind a CombinationHandler
        Vec::new()
    }

    fn label(&self) -> String {
        format!("MacroHandler \"{}\" on \"{}\"", self.macro_.source(), self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventSource;
    use crate::event::ev;
    use crate::outputs::{Capabilities, ForwardOutput, OutputKind, RecordingSink};
    use crate::symbols::SymbolTable;

    #[tokio::test(start_paused = true)]
    async fn runs_and_releases() {
        let symbols = SymbolTable::capture();
        let macro_ = Rc::new(crate::macros::parse("hold_keys(BTN_LEFT)", &symbols).unwrap());
        let sink = RecordingSink::new();
        let mut outputs = VirtualOutputs::new();
        outputs.register("mouse", OutputKind::Mouse.template(), Box::new(sink.clone()));
        let mut handler = MacroHandler::new(
            InputCombination::parse("1,58,1").unwrap(),
            Rc::clone(&macro_),
            Rc::new(outputs),
            "mouse",
        );

        let source = Rc::new(EventSource {
            path: "/dev/input/event0".into(),
            name: "test".into(),
            capabilities: Capabilities::default(),
            is_gamepad: false,
        });
        let forward = ForwardOutput::from_sink("test", Box::new(RecordingSink::new()));
        let left = evdev::Key::BTN_LEFT.code();

        tokio::task::LocalSet::new()
            .run_until(async {
                let args = NotifyArgs::new(&source, &forward);
                assert!(handler.notify(&InputEvent::new(ev::EV_KEY, 58, 1), &args));
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                assert_eq!(sink.events(), vec![(ev::EV_KEY, left, 1)]);

                assert!(handler.notify(&InputEvent::new(ev::EV_KEY, 58, 0), &args));
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                assert_eq!(
                    sink.events(),
                    vec![(ev::EV_KEY, left, 1), (ev::EV_KEY, left, 0)]
                );
            })
            .await;
    }
}
