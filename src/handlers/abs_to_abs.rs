//! Absolute axis → absolute axis.

use std::rc::Rc;

use log::{error, warn};

use super::{occlude, scale_to_range, EventHandler, HandlerKind, NotifyArgs};
use crate::combination::InputCombination;
use crate::error::Error;
use crate::event::{EventActions, InputEvent};
use crate::mapping::Mapping;
use crate::outputs::{AbsRange, VirtualOutputs};
use crate::transform::Transformation;

/// Shapes one source absolute axis onto one target absolute axis.
///
/// The source absinfo is only known once the device is open, so the
/// transformation is built lazily from the first event's source. Recenter
/// requests write the target's neutral value.
pub struct AbsToAbsHandler {
    combination: InputCombination,
    map_axis: (u16, u16),
    output: (u16, u16),
    target: String,
    target_absinfo: AbsRange,
    outputs: Rc<VirtualOutputs>,
    deadzone: f64,
    gain: f64,
    expo: f64,
    transform: Option<Transformation>,
    handled: Vec<InputEvent>,
}

impl AbsToAbsHandler {
    pub fn new(
        mapping: &Mapping,
        outputs: Rc<VirtualOutputs>,
    ) -> crate::Result<Self> {
        let combination = mapping.event_combination.clone();
        let analog = combination
            .find_analog_input(Some(crate::event::ev::EV_ABS))
            .ok_or_else(|| {
                Error::InvalidMapping(format!("\"{}\" has no analog EV_ABS input", mapping.label()))
            })?;
        let output = mapping.output_tuple().ok_or_else(|| {
            Error::InvalidMapping(format!("\"{}\" has no output axis", mapping.label()))
        })?;
        let target_absinfo = outputs.get_absinfo(&mapping.target_uinput, output.1)?;

        Ok(Self {
            map_axis: analog.type_and_code(),
            handled: vec![*analog],
            combination,
            output,
            target: mapping.target_uinput.clone(),
            target_absinfo,
            outputs,
            deadzone: mapping.deadzone,
            gain: mapping.gain,
            expo: mapping.expo,
            transform: None,
        })
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
}

impl EventHandler for AbsToAbsHandler {
    fn notify(&mut self, event: &InputEvent, args: &NotifyArgs<'_>) -> bool {
        if event.type_and_code() != self.map_axis {
            return false;
        }

        if event.actions.contains(EventActions::RECENTER) {
            return self.write(scale_to_range(0.0, self.target_absinfo));
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

        let x = transform.apply(f64::from(event.value));
        if !x.is_finite() {
            error!("{}: non-finite value for input {}", self.label(), event.value);
            return true;
        }
        self.write(scale_to_range(x.clamp(-1.0, 1.0), self.target_absinfo))
    }

    fn reset(&mut self) {
        self.write(scale_to_range(0.0, self.target_absinfo));
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
            // behind an AxisSwitchHandler
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
            "AbsToAbsHandler ({}, {}) -> ({}, {}) on \"{}\"",
            self.map_axis.0, self.map_axis.1, self.output.0, self.output.1, self.target
        )
    }
}
