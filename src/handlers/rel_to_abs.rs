//! Relative motion → absolute position.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use log::{error, warn};
use tokio::time::{sleep_until, Instant};

use super::{occlude, scale_to_range, EventHandler, HandlerKind, NotifyArgs};
use crate::combination::InputCombination;
use crate::error::Error;
use crate::event::{ev, EventActions, InputEvent};
use crate::mapping::Mapping;
use crate::outputs::VirtualOutputs;
use crate::transform::Transformation;

/// The event rate assumed until two samples allow observing the real one.
const DEFAULT_RATE: f64 = 60.0;

/// Maps relative motion onto an absolute output axis, e.g. mouse → joystick.
///
/// The per-event input range is `rel_*_max_input` at the default 60 Hz event
/// rate; the observed rate (from consecutive timestamps) rescales it so a
/// 1000 Hz mouse does not saturate the axis instantly. A recenter task
/// returns the output to neutral once no motion arrived for
/// `release_timeout` seconds.
pub struct RelToAbsHandler {
    combination: InputCombination,
    input_movement: (u16, u16),
    output: (u16, u16),
    target: String,
    outputs: Rc<VirtualOutputs>,

    max_input: f64,
    release_timeout: Duration,
    transform: Transformation,
    prev_timestamp: Option<f64>,

    last_motion: Rc<Cell<Instant>>,
    recenter_running: Rc<Cell<bool>>,
    cancelled: Rc<Cell<bool>>,
    handled: Vec<InputEvent>,
}

impl RelToAbsHandler {
    pub fn new(mapping: &Mapping, outputs: Rc<VirtualOutputs>) -> crate::Result<Self> {
        let combination = mapping.event_combination.clone();
        let analog = combination
            .find_analog_input(Some(ev::EV_REL))
            .ok_or_else(|| {
                Error::InvalidMapping(format!("\"{}\" has no analog EV_REL input", mapping.label()))
            })?;
        let output = mapping.output_tuple().ok_or_else(|| {
            Error::InvalidMapping(format!("\"{}\" has no output axis", mapping.label()))
        })?;
        // make sure the target actually has the axis
        outputs.get_absinfo(&mapping.target_uinput, output.1)?;

        let max_input = if analog.is_wheel_event() {
            mapping.rel_wheel_max_input
        } else if analog.is_wheel_hi_res_event() {
            mapping.rel_wheel_hi_res_max_input
        } else {
            mapping.rel_xy_max_input
        };

        Ok(Self {
            input_movement: analog.type_and_code(),
            handled: vec![*analog],
            combination,
            output,
            target: mapping.target_uinput.clone(),
            outputs,
            max_input,
            release_timeout: Duration::from_secs_f64(mapping.release_timeout),
            transform: Transformation::new(
                -max_input,
                max_input,
                mapping.deadzone,
                mapping.gain,
                mapping.expo,
            ),
            prev_timestamp: None,
            last_motion: Rc::new(Cell::new(Instant::now())),
            recenter_running: Rc::new(Cell::new(false)),
            cancelled: Rc::new(Cell::new(false)),
        })
    }

    /// Rescale the input range when the observed event rate changes.
    fn observe_rate(&mut self, event: &InputEvent) {
        let timestamp = event.timestamp();
        if timestamp == 0.0 {
            return;
        }
        if let Some(prev) = self.prev_timestamp {
            let gap = timestamp - prev;
            if gap > 0.0 && gap < 1.0 {
                let rate = 1.0 / gap;
                let max = self.max_input * DEFAULT_RATE / rate;
                self.transform.set_range(-max, max);
            }
        }
        self.prev_timestamp = Some(timestamp);
    }

    fn write(&self, value: i32) -> bool {
        match self
            .outputs
            .write((self.output.0, self.output.1, value), &self.target)
        {
            Ok(()) => true,
            Err(e @ Error::Io(_)) => {
                error!("{}: {e}", self.label());
                true
            }
            Err(e) => {
                warn!("{}: {e}", self.label());
                false
            }
        }
    }

    fn neutral(&self) -> i32 {
        self.outputs
            .get_absinfo(&self.target, self.output.1)
            .map(|range| scale_to_range(0.0, range))
            .unwrap_or(0)
    }

    fn ensure_recenter_task(&self) {
        if self.recenter_running.get() {
            return;
        }
        self.recenter_running.set(true);
        self.cancelled.set(false);

        let last_motion = Rc::clone(&self.last_motion);
        let running = Rc::clone(&self.recenter_running);
        let cancelled = Rc::clone(&self.cancelled);
        let timeout = self.release_timeout;
        let outputs = Rc::clone(&self.outputs);
        let target = self.target.clone();
        let output = self.output;
        let neutral = self.neutral();

        tokio::task::spawn_local(async move {
            loop {
                let deadline = last_motion.get() + timeout;
                if cancelled.get() {
                    running.set(false);
                    return;
                }
                if Instant::now() >= deadline {
                    running.set(false);
                    if let Err(e) = outputs.write((output.0, output.1, neutral), &target) {
                        warn!("recentering failed: {e}");
                    }
                    return;
                }
                sleep_until(deadline).await;
            }
        });
    }
}

impl EventHandler for RelToAbsHandler {
    fn notify(&mut self, event: &InputEvent, _args: &NotifyArgs<'_>) -> bool {
        if event.type_and_code() != self.input_movement {
            return false;
        }

        if event.actions.contains(EventActions::RECENTER) {
            self.cancelled.set(true);
            return self.write(self.neutral());
        }

        self.observe_rate(event);
        self.last_motion.set(Instant::now());

        let x = self.transform.apply(f64::from(event.value));
        if !x.is_finite() {
            error!("{}: non-finite value for input {}", self.label(), event.value);
            return true;
        }
        let range = match self.outputs.get_absinfo(&self.target, self.output.1) {
            Ok(range) => range,
            Err(e) => {
                warn!("{}: {e}", self.label());
                return false;
            }
        };
        let claimed = self.write(scale_to_range(x.clamp(-1.0, 1.0), range));
        if claimed {
            self.ensure_recenter_task();
        }
        claimed
    }

    fn reset(&mut self) {
        self.cancelled.set(true);
        self.write(self.neutral());
    }

    fn wrap_with(&self) -> Vec<(InputCombination, HandlerKind)> {
        if self.combination.len() > 1 {
            vec![(self.combination.clone(), HandlerKind::AxisSwitch)]
        } else {
            Vec::new()
        }
    }

    fn handled_events(&self) -> Vec<InputEvent> {
        if self.combination.len() > 1 {
            Vec::new()
        } else {
            self.handled.clone()
        }
    }

    fn occlude_input_event(&mut self, event: &InputEvent) {
        occlude(&mut self.handled, event);
    }

    fn label(&self) -> String {
        format!(
            "RelToAbsHandler ({}, {}) -> ({}, {}) on \"{}\"",
            self.input_movement.0, self.input_movement.1, self.output.0, self.output.1, self.target
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventSource;
    use crate::outputs::{Capabilities, ForwardOutput, OutputKind, RecordingSink};
    use std::cell::RefCell;
    use tokio::task::LocalSet;

    fn fixture() -> (
        Rc<RefCell<RelToAbsHandler>>,
        RecordingSink,
        Rc<EventSource>,
        ForwardOutput,
    ) {
        let sink = RecordingSink::new();
        let mut outputs = VirtualOutputs::new();
        outputs.register("gamepad", OutputKind::Gamepad.template(), Box::new(sink.clone()));

        let mut mapping = Mapping::code_output(
            InputCombination::parse("2,0,0").unwrap(), // REL_X analog
            "gamepad",
            ev::EV_ABS,
            0,
        );
        mapping.deadzone = 0.0;
        mapping.rel_xy_max_input = 100.0;
        let handler = RelToAbsHandler::new(&mapping, Rc::new(outputs)).unwrap();

        let mut capabilities = Capabilities::default();
        capabilities.rel.insert(0);
        let source = Rc::new(EventSource {
            path: "/dev/input/event0".into(),
            name: "mouse".into(),
            capabilities,
            is_gamepad: false,
        });
        let forward = ForwardOutput::from_sink("mouse", Box::new(RecordingSink::new()));
        (Rc::new(RefCell::new(handler)), sink, source, forward)
    }

    #[tokio::test(start_paused = true)]
    async fn writes_scaled_position_and_recenters_when_quiet() {
        let (handler, sink, source, forward) = fixture();

        LocalSet::new()
            .run_until(async {
                {
                    let args = NotifyArgs::new(&source, &forward);
                    assert!(handler
                        .borrow_mut()
                        .notify(&InputEvent::new(ev::EV_REL, 0, 100), &args));
                }
                let first = sink.events()[0];
                assert_eq!(first.0, ev::EV_ABS);
                assert_eq!(first.2, 32767);

                // quiet for longer than release_timeout: neutral arrives
                tokio::time::sleep(Duration::from_millis(200)).await;
                let last = *sink.events().last().unwrap();
                assert!(last.2.abs() <= 1, "did not recenter: {last:?}");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn recenter_action_writes_neutral_immediately() {
        let (handler, sink, source, forward) = fixture();
        LocalSet::new()
            .run_until(async {
                let args = NotifyArgs::new(&source, &forward);
                let recenter =
                    InputEvent::new(ev::EV_REL, 0, 0).with_actions(EventActions::RECENTER);
                assert!(handler.borrow_mut().notify(&recenter, &args));
                assert!(sink.events()[0].2.abs() <= 1);
            })
            .await;
    }
}
