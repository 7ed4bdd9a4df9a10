//! Relative axis → button with debounced release.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use log::debug;
use tokio::time::{sleep, Instant};

use super::{occlude, EventHandler, NotifyArgs, SharedHandler};
use crate::context::EventSource;
use crate::event::{EventActions, InputEvent};
use crate::outputs::ForwardOutput;

/// How often the staged release checks whether the input went quiet.
const RELEASE_POLL: Duration = Duration::from_micros(1_000_000 / 60);

/// Turns relative motion (wheel clicks, mouse movement) into a held button.
///
/// A relative axis never reports a release, so the press is synthesized on
/// the first matching event and a staged task releases it once no motion
/// arrived for `release_timeout` seconds. Events with the wrong sign or
/// below the threshold are claimed and ignored.
pub struct RelToBtnHandler {
    event: InputEvent,
    release_timeout: Duration,
    active: Rc<Cell<bool>>,
    last_activation: Rc<Cell<Instant>>,
    sub: Option<SharedHandler>,
    handled: Vec<InputEvent>,
}

impl RelToBtnHandler {
    /// `event` is the bound member; its (non-zero) value is the threshold.
    pub fn new(event: InputEvent, release_timeout: f64) -> Self {
        debug_assert!(event.value != 0);
        Self {
            event,
            release_timeout: Duration::from_secs_f64(release_timeout),
            active: Rc::new(Cell::new(false)),
            last_activation: Rc::new(Cell::new(Instant::now())),
            sub: None,
            handled: vec![event],
        }
    }

    fn stage_release(&self, source: &Rc<EventSource>, forward: &ForwardOutput, suppress: bool) {
        let active = Rc::clone(&self.active);
        let last_activation = Rc::clone(&self.last_activation);
        let timeout = self.release_timeout;
        let sub = self.sub.clone();
        let release = self
            .event
            .with_value(0)
            .with_actions(EventActions::AS_KEY);
        let source = Rc::clone(source);
        let forward = forward.clone();

        tokio::task::spawn_local(async move {
            while Instant::now() < last_activation.get() + timeout {
                sleep(RELEASE_POLL).await;
                if !active.get() {
                    // reset beat us to it
                    return;
                }
            }
            active.set(false);
            if let Some(sub) = sub {
                let args = NotifyArgs {
                    source: &source,
                    forward: &forward,
                    suppress,
                };
                sub.borrow_mut().notify(&release, &args);
            }
        });
    }
}

impl EventHandler for RelToBtnHandler {
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        if event.type_and_code() != self.event.type_and_code() {
            return false;
        }

        let threshold = self.event.value;
        let value = event.value;
        if (threshold > 0 && value < threshold) || (threshold < 0 && value > threshold) {
            return true;
        }

        if self.active.get() {
            self.last_activation.set(Instant::now());
            return true;
        }

        self.active.set(true);
        self.last_activation.set(Instant::now());
        self.stage_release(args.source, args.forward, args.suppress);

        let press = event.with_value(1).with_actions(EventActions::AS_KEY);
        debug!("{}: sending press to sub-handler", self.label());
        match &self.sub {
            Some(sub) => sub.borrow_mut().notify(&press, args),
            None => false,
        }
    }

    fn reset(&mut self) {
        self.active.set(false);
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
            "RelToBtnHandler for ({}, {}) at {}",
            self.event.ev_type, self.event.code, self.event.value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ev;
    use crate::outputs::{Capabilities, RecordingSink};
    use std::cell::RefCell;
    use tokio::task::LocalSet;

    struct Collector(Rc<RefCell<Vec<InputEvent>>>);

    impl EventHandler for Collector {
        fn notify(&mut self, event: &InputEvent, _args: &NotifyArgs<'_>) -> bool {
            self.0.borrow_mut().push(*event);
            true
        }
        fn reset(&mut self) {}
        fn handled_events(&self) -> Vec<InputEvent> {
            Vec::new()
        }
        fn label(&self) -> String {
            "Collector".into()
        }
    }

    fn fixture() -> (
        Rc<RefCell<RelToBtnHandler>>,
        Rc<RefCell<Vec<InputEvent>>>,
        Rc<EventSource>,
        ForwardOutput,
    ) {
        let seen: Rc<RefCell<Vec<InputEvent>>> = Rc::default();
        // REL_WHEEL upwards, default release timeout
        let mut handler = RelToBtnHandler::new(InputEvent::new(ev::EV_REL, 8, 1), 0.05);
        handler.set_sub_handler(Rc::new(RefCell::new(Collector(Rc::clone(&seen)))));
        let source = Rc::new(EventSource {
            path: "/dev/input/event0".into(),
            name: "mouse".into(),
            capabilities: Capabilities::default(),
            is_gamepad: false,
        });
        let forward = ForwardOutput::from_sink("mouse", Box::new(RecordingSink::new()));
        (Rc::new(RefCell::new(handler)), seen, source, forward)
    }

    #[tokio::test(start_paused = true)]
    async fn presses_then_releases_after_quiet_period() {
        let (handler, seen, source, forward) = fixture();

        LocalSet::new()
            .run_until(async {
                {
                    let args = NotifyArgs::new(&source, &forward);
                    assert!(handler
                        .borrow_mut()
                        .notify(&InputEvent::new(ev::EV_REL, 8, 1), &args));
                }
                assert_eq!(seen.borrow().len(), 1);
                assert_eq!(seen.borrow()[0].value, 1);

                // keeps re-arming while motion continues
                tokio::time::sleep(Duration::from_millis(30)).await;
                {
                    let args = NotifyArgs::new(&source, &forward);
                    assert!(handler
                        .borrow_mut()
                        .notify(&InputEvent::new(ev::EV_REL, 8, 2), &args));
                }
                tokio::time::sleep(Duration::from_millis(30)).await;
                assert_eq!(seen.borrow().len(), 1, "released too early");

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(seen.borrow().len(), 2);
                assert_eq!(seen.borrow()[1].value, 0);
                assert!(seen.borrow()[1].actions.contains(EventActions::AS_KEY));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_direction_is_claimed_but_ignored() {
        let (handler, seen, source, forward) = fixture();
        LocalSet::new()
            .run_until(async {
                let args = NotifyArgs::new(&source, &forward);
                assert!(handler
                    .borrow_mut()
                    .notify(&InputEvent::new(ev::EV_REL, 8, -1), &args));
                assert!(seen.borrow().is_empty());
            })
            .await;
    }
}
