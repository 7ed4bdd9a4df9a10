//! Absolute axis → relative motion loop.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use evdev::RelativeAxisType;
use log::warn;
use tokio::time::{sleep, Instant};

use super::{occlude, EventHandler, HandlerKind, NotifyArgs};
use crate::combination::InputCombination;
use crate::error::Error;
use crate::event::{ev, EventActions, InputEvent};
use crate::mapping::Mapping;
use crate::outputs::{AbsRange, VirtualOutputs};
use crate::transform::Transformation;

/// Emits relative events at `rel_rate` Hz while an absolute axis is pushed.
///
/// `rel_speed` (and the wheel speeds) are units per second at full
/// deflection; each tick contributes `value · speed / rate` and carries the
/// fractional remainder over, so slow sub-unit motion is preserved instead of
/// rounding to nothing. Wheel outputs write the low- and high-resolution code
/// pair, since some consumers only observe one of them.
pub struct AbsToRelHandler {
    combination: InputCombination,
    map_axis: (u16, u16),
    output_code: u16,
    target: String,
    outputs: Rc<VirtualOutputs>,

    deadzone: f64,
    gain: f64,
    expo: f64,
    rel_rate: u32,
    rel_speed: f64,
    rel_wheel_speed: f64,
    rel_wheel_hi_res_speed: f64,

    transform: Option<Transformation>,
    value: Rc<Cell<f64>>,
    running: Rc<Cell<bool>>,
    stop: Rc<Cell<bool>>,
    handled: Vec<InputEvent>,
}

impl AbsToRelHandler {
    pub fn new(mapping: &Mapping, outputs: Rc<VirtualOutputs>) -> crate::Result<Self> {
        let combination = mapping.event_combination.clone();
        let analog = combination
            .find_analog_input(Some(ev::EV_ABS))
            .ok_or_else(|| {
                Error::InvalidMapping(format!("\"{}\" has no analog EV_ABS input", mapping.label()))
            })?;
        let output = mapping.output_tuple().ok_or_else(|| {
            Error::InvalidMapping(format!("\"{}\" has no output code", mapping.label()))
        })?;

        Ok(Self {
            map_axis: analog.type_and_code(),
            handled: vec![*analog],
            combination,
            output_code: output.1,
            target: mapping.target_uinput.clone(),
            outputs,
            deadzone: mapping.deadzone,
            gain: mapping.gain,
            expo: mapping.expo,
            rel_rate: mapping.rel_rate,
            rel_speed: mapping.rel_speed,
            rel_wheel_speed: mapping.rel_wheel_speed,
            rel_wheel_hi_res_speed: mapping.rel_wheel_hi_res_speed,
            transform: None,
            value: Rc::new(Cell::new(0.0)),
            running: Rc::new(Cell::new(false)),
            stop: Rc::new(Cell::new(true)),
        })
    }

    /// `(codes, weights)` per tick. Wheel outputs drive both resolutions.
    fn outputs_per_tick(&self) -> Vec<(u16, f64)> {
        let wheel = RelativeAxisType::REL_WHEEL.0;
        let wheel_hi = RelativeAxisType::REL_WHEEL_HI_RES.0;
        let hwheel = RelativeAxisType::REL_HWHEEL.0;
        let hwheel_hi = RelativeAxisType::REL_HWHEEL_HI_RES.0;

        if self.output_code == wheel || self.output_code == wheel_hi {
            vec![
                (wheel, self.rel_wheel_speed),
                (wheel_hi, self.rel_wheel_hi_res_speed),
            ]
        } else if self.output_code == hwheel || self.output_code == hwheel_hi {
            vec![
                (hwheel, self.rel_wheel_speed),
                (hwheel_hi, self.rel_wheel_hi_res_speed),
            ]
        } else {
            vec![(self.output_code, self.rel_speed)]
        }
    }

    fn spawn_loop(&self) {
        let value = Rc::clone(&self.value);
        let running = Rc::clone(&self.running);
        let stop = Rc::clone(&self.stop);
        let outputs = Rc::clone(&self.outputs);
        let target = self.target.clone();
        let rate = f64::from(self.rel_rate);
        let tick = Duration::from_secs_f64(1.0 / rate);
        let channels = self.outputs_per_tick();

        running.set(true);
        stop.set(false);
        tokio::task::spawn_local(async move {
            let mut remainders = vec![0.0f64; channels.len()];
            let mut tick_start = Instant::now();
            while !stop.get() {
                for ((code, weight), remainder) in channels.iter().zip(remainders.iter_mut()) {
                    let scaled = value.get() * weight / rate + *remainder;
                    let whole = scaled.floor();
                    *remainder = scaled - whole;
                    if whole != 0.0 {
                        if let Err(e) = outputs.write((ev::EV_REL, *code, whole as i32), &target) {
                            warn!("abs-to-rel write failed: {e}");
                        }
                    }
                }
                let elapsed = tick_start.elapsed();
                sleep(tick.saturating_sub(elapsed)).await;
                tick_start = Instant::now();
            }
            running.set(false);
        });
    }
}

impl EventHandler for AbsToRelHandler {
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        if event.type_and_code() != self.map_axis {
            return false;
        }

        if event.actions.contains(EventActions::RECENTER) {
            self.stop.set(true);
            return true;
        }

        if self.transform.is_none() {
            let absinfo = args
                .source
                .absinfo(event.code)
                .unwrap_or(AbsRange::new(-1, 1));
            self.transform = Some(Transformation::new(
                f64::from(absinfo.min),
                f64::from(absinfo.max),
                self.deadzone,
                self.gain,
                self.expo,
            ));
        }
        let Some(transform) = &self.transform else {
            return false;
        };

        let transformed = transform.apply(f64::from(event.value));
        if !transformed.is_finite() {
            warn!("{}: non-finite value for input {}", self.label(), event.value);
            return true;
        }
        self.value.set(transformed);

        if transformed == 0.0 {
            self.stop.set(true);
            return true;
        }

        if !self.running.get() {
            self.spawn_loop();
        }
        true
    }

    fn reset(&mut self) {
        self.stop.set(true);
        self.value.set(0.0);
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
            "AbsToRelHandler ({}, {}) -> {} on \"{}\"",
            self.map_axis.0, self.map_axis.1, self.output_code, self.target
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
        Rc<RefCell<AbsToRelHandler>>,
        RecordingSink,
        Rc<EventSource>,
        ForwardOutput,
    ) {
        let sink = RecordingSink::new();
        let mut outputs = VirtualOutputs::new();
        outputs.register("mouse", OutputKind::Mouse.template(), Box::new(sink.clone()));

        let mut mapping = Mapping::code_output(
            InputCombination::parse("3,0,0").unwrap(),
            "mouse",
            ev::EV_REL,
            0, // REL_X
        );
        mapping.rel_speed = 100.0;
        mapping.rel_rate = 60;
        mapping.gain = 1.0;
        mapping.deadzone = 0.1;
        let handler = AbsToRelHandler::new(&mapping, Rc::new(outputs)).unwrap();

        let mut capabilities = Capabilities::default();
        capabilities.abs.insert(0, AbsRange::new(-32768, 32767));
        let source = Rc::new(EventSource {
            path: "/dev/input/event0".into(),
            name: "pad".into(),
            capabilities,
            is_gamepad: true,
        });
        let forward = ForwardOutput::from_sink("pad", Box::new(RecordingSink::new()));
        (Rc::new(RefCell::new(handler)), sink, source, forward)
    }

    #[tokio::test(start_paused = true)]
    async fn full_deflection_emits_speed_units_per_second() {
        let (handler, sink, source, forward) = fixture();

        LocalSet::new()
            .run_until(async {
                {
                    let args = NotifyArgs::new(&source, &forward);
                    assert!(handler
                        .borrow_mut()
                        .notify(&InputEvent::new(ev::EV_ABS, 0, 32767), &args));
                }
                tokio::time::sleep(Duration::from_millis(100)).await;

                let events = sink.events();
                assert!(events.len() >= 5, "expected >= 5 ticks, got {}", events.len());
                assert!(events.iter().all(|(t, c, v)| *t == ev::EV_REL && *c == 0 && *v > 0));
                let total: i32 = events.iter().map(|(_, _, v)| v).sum();
                // 100 units/s for 0.1 s
                assert!((8..=12).contains(&total), "moved {total} units");

                // release: the loop stops within one tick
                {
                    let args = NotifyArgs::new(&source, &forward);
                    handler
                        .borrow_mut()
                        .notify(&InputEvent::new(ev::EV_ABS, 0, 0), &args);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                let count = sink.events().len();
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(sink.events().len(), count);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn recenter_stops_the_loop() {
        let (handler, sink, source, forward) = fixture();
        LocalSet::new()
            .run_until(async {
                {
                    let args = NotifyArgs::new(&source, &forward);
                    handler
                        .borrow_mut()
                        .notify(&InputEvent::new(ev::EV_ABS, 0, 32767), &args);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                {
                    let args = NotifyArgs::new(&source, &forward);
                    let recenter =
                        InputEvent::new(ev::EV_ABS, 0, 0).with_actions(EventActions::RECENTER);
                    assert!(handler.borrow_mut().notify(&recenter, &args));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                let count = sink.events().len();
                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(sink.events().len(), count);
            })
            .await;
    }
}
