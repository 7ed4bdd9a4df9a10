//! Relative axis → relative axis.

use std::rc::Rc;

use evdev::RelativeAxisType;
use log::{error, warn};

use super::{occlude, EventHandler, HandlerKind, NotifyArgs};
use crate::combination::InputCombination;
use crate::error::Error;
use crate::event::{ev, InputEvent};
use crate::mapping::Mapping;
use crate::outputs::VirtualOutputs;
use crate::transform::Transformation;

/// Accumulates the fractional part of scaled motion so slow input still
/// moves eventually instead of truncating to zero forever.
#[derive(Debug)]
struct Remainder {
    scale: f64,
    remainder: f64,
}

impl Remainder {
    fn new(scale: f64) -> Self {
        Self {
            scale,
            remainder: 0.0,
        }
    }

    fn input(&mut self, value: f64) -> i32 {
        let scaled = value * self.scale + self.remainder;
        let whole = scaled.trunc();
        self.remainder = scaled - whole;
        whole as i32
    }
}

/// Rescales relative motion onto another relative code.
///
/// Wheel outputs write the low- and high-resolution codes together with
/// separate remainder accumulators; otherwise motion routes to the
/// configured output code.
pub struct RelToRelHandler {
    combination: InputCombination,
    input_event: InputEvent,
    output_code: u16,
    target: String,
    outputs: Rc<VirtualOutputs>,

    transform: Transformation,
    wheel_remainder: Remainder,
    wheel_hi_res_remainder: Remainder,
    xy_remainder: Remainder,
    handled: Vec<InputEvent>,
}

impl RelToRelHandler {
    pub fn new(mapping: &Mapping, outputs: Rc<VirtualOutputs>) -> crate::Result<Self> {
        let combination = mapping.event_combination.clone();
        let analog = *combination
            .find_analog_input(Some(ev::EV_REL))
            .ok_or_else(|| {
                Error::InvalidMapping(format!("\"{}\" has no analog EV_REL input", mapping.label()))
            })?;
        let output = mapping.output_tuple().ok_or_else(|| {
            Error::InvalidMapping(format!("\"{}\" has no output code", mapping.label()))
        })?;

        let max_input = if analog.is_wheel_event() {
            mapping.rel_wheel_max_input
        } else if analog.is_wheel_hi_res_event() {
            mapping.rel_wheel_hi_res_max_input
        } else {
            mapping.rel_xy_max_input
        };

        Ok(Self {
            input_event: analog,
            handled: vec![analog],
            combination,
            output_code: output.1,
            target: mapping.target_uinput.clone(),
            outputs,
            transform: Transformation::new(
                -max_input,
                max_input,
                mapping.deadzone,
                mapping.gain,
                mapping.expo,
            ),
            wheel_remainder: Remainder::new(mapping.rel_wheel_speed),
            wheel_hi_res_remainder: Remainder::new(mapping.rel_wheel_hi_res_speed),
            xy_remainder: Remainder::new(mapping.rel_speed),
        })
    }

    fn is_wheel_output(&self) -> bool {
        matches!(
            self.output_code,
            c if c == RelativeAxisType::REL_WHEEL.0
                || c == RelativeAxisType::REL_HWHEEL.0
                || c == RelativeAxisType::REL_WHEEL_HI_RES.0
                || c == RelativeAxisType::REL_HWHEEL_HI_RES.0
        )
    }

    fn is_horizontal_output(&self) -> bool {
        self.output_code == RelativeAxisType::REL_HWHEEL.0
            || self.output_code == RelativeAxisType::REL_HWHEEL_HI_RES.0
    }

    fn write(&self, code: u16, value: i32) -> crate::Result<()> {
        if value == 0 {
            return Ok(());
        }
        self.outputs.write((ev::EV_REL, code, value), &self.target)
    }
}

impl EventHandler for RelToRelHandler {
    fn notify(&mut self, event: &InputEvent, _args: &NotifyArgs<'_>) -> bool {
        if event.type_and_code() != self.input_event.type_and_code() {
            return false;
        }

        let transformed = self.transform.apply(f64::from(event.value));
        if !transformed.is_finite() {
            error!("{}: non-finite value for input {}", self.label(), event.value);
            return true;
        }

        let result = if self.is_wheel_output() {
            // both resolutions, so every consumer observes motion
            let (wheel, hi_res) = if self.is_horizontal_output() {
                (
                    RelativeAxisType::REL_HWHEEL.0,
                    RelativeAxisType::REL_HWHEEL_HI_RES.0,
                )
            } else {
                (
                    RelativeAxisType::REL_WHEEL.0,
                    RelativeAxisType::REL_WHEEL_HI_RES.0,
                )
            };
            let low = self.wheel_remainder.input(transformed);
            let high = self.wheel_hi_res_remainder.input(transformed);
            self.write(wheel, low).and_then(|()| self.write(hi_res, high))
        } else {
            let value = self.xy_remainder.input(transformed);
            self.write(self.output_code, value)
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: {e}", self.label());
                false
            }
        }
    }

    fn reset(&mut self) {}

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
            "RelToRelHandler ({}, {}) -> {} on \"{}\"",
            self.input_event.ev_type, self.input_event.code, self.output_code, self.target
        )
    }
}
