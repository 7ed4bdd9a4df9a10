//! One user rule: an input combination and what to emit for it.
//!
//! [`Mapping`] is the serde surface of a single rule. Exactly one of
//! `output_symbol` (a key name or macro source) and the explicit
//! `output_type`/`output_code` pair is set; the shaping fields only matter
//! for rules with an analog side and keep their defaults otherwise.
//!
//! Validation happens at preset load: a broken mapping is reported (and, in
//! the injector, dropped) instead of producing a half-working graph.

use serde::{Deserialize, Serialize};

use crate::combination::InputCombination;
use crate::error::{Error, Result};
use crate::event::ev;
use crate::macros;
use crate::symbols::SymbolTable;

/// The symbol that maps an input to nothing at all.
pub const DISABLE_SYMBOL: &str = "disable";

fn default_deadzone() -> f64 {
    0.1
}
fn default_gain() -> f64 {
    1.0
}
fn default_rel_rate() -> u32 {
    60
}
fn default_release_timeout() -> f64 {
    0.05
}
fn default_rel_speed() -> f64 {
    100.0
}
fn default_rel_wheel_speed() -> f64 {
    1.0
}
fn default_rel_wheel_hi_res_speed() -> f64 {
    120.0
}
fn default_rel_xy_max_input() -> f64 {
    100.0
}
fn default_rel_wheel_max_input() -> f64 {
    1.0
}
fn default_rel_wheel_hi_res_max_input() -> f64 {
    120.0
}

/// A single remapping rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    /// Optional display name; the combination string is used when absent.
    #[serde(default)]
    pub name: Option<String>,

    /// The triggering input, e.g. `"1,29,1+1,30,1"`.
    pub event_combination: InputCombination,

    /// Which virtual output receives the produced events.
    pub target_uinput: String,

    /// Key name or macro source. Mutually exclusive with `output_type`.
    #[serde(default)]
    pub output_symbol: Option<String>,

    /// Explicit output event type (`EV_KEY`, `EV_ABS`, `EV_REL`).
    #[serde(default)]
    pub output_type: Option<u16>,
    /// Explicit output event code.
    #[serde(default)]
    pub output_code: Option<u16>,
    /// Optional static output value.
    #[serde(default)]
    pub output_value: Option<i32>,

    /// Fraction of the axis range treated as neutral.
    #[serde(default = "default_deadzone")]
    pub deadzone: f64,
    /// Output multiplier after shaping.
    #[serde(default = "default_gain")]
    pub gain: f64,
    /// Cubic expo factor in `[-1, 1]`; 0 is linear.
    #[serde(default)]
    pub expo: f64,

    /// Tick frequency (Hz) of injection loops (absolute → relative).
    #[serde(default = "default_rel_rate")]
    pub rel_rate: u32,
    /// Seconds without input after which synthesized buttons release and
    /// relative-driven axes recenter.
    #[serde(default = "default_release_timeout")]
    pub release_timeout: f64,

    /// Units per tick at full deflection for pointer output.
    #[serde(default = "default_rel_speed")]
    pub rel_speed: f64,
    /// Scale for low-resolution wheel output.
    #[serde(default = "default_rel_wheel_speed")]
    pub rel_wheel_speed: f64,
    /// Scale for high-resolution wheel output.
    #[serde(default = "default_rel_wheel_hi_res_speed")]
    pub rel_wheel_hi_res_speed: f64,

    /// Input value treated as full deflection for REL_X/REL_Y input.
    #[serde(default = "default_rel_xy_max_input")]
    pub rel_xy_max_input: f64,
    /// Input value treated as full deflection for wheel input.
    #[serde(default = "default_rel_wheel_max_input")]
    pub rel_wheel_max_input: f64,
    /// Input value treated as full deflection for hi-res wheel input.
    #[serde(default = "default_rel_wheel_hi_res_max_input")]
    pub rel_wheel_hi_res_max_input: f64,
}

impl Mapping {
    /// A key-output mapping with defaults everywhere else. Handy in tests and
    /// for programmatic presets.
    pub fn key_output(combination: InputCombination, target: &str, symbol: &str) -> Self {
        Self {
            name: None,
            event_combination: combination,
            target_uinput: target.to_string(),
            output_symbol: Some(symbol.to_string()),
            output_type: None,
            output_code: None,
            output_value: None,
            deadzone: default_deadzone(),
            gain: default_gain(),
            expo: 0.0,
            rel_rate: default_rel_rate(),
            release_timeout: default_release_timeout(),
            rel_speed: default_rel_speed(),
            rel_wheel_speed: default_rel_wheel_speed(),
            rel_wheel_hi_res_speed: default_rel_wheel_hi_res_speed(),
            rel_xy_max_input: default_rel_xy_max_input(),
            rel_wheel_max_input: default_rel_wheel_max_input(),
            rel_wheel_hi_res_max_input: default_rel_wheel_hi_res_max_input(),
        }
    }

    /// An explicit `(type, code)` output mapping with defaults elsewhere.
    pub fn code_output(
        combination: InputCombination,
        target: &str,
        output_type: u16,
        output_code: u16,
    ) -> Self {
        Self {
            output_symbol: None,
            output_type: Some(output_type),
            output_code: Some(output_code),
            ..Self::key_output(combination, target, "")
        }
    }

    /// Display label for logs.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.event_combination.json_key())
    }

    /// The explicit output `(type, code)` if one is configured.
    pub fn output_tuple(&self) -> Option<(u16, u16)> {
        Some((self.output_type?, self.output_code?))
    }

    /// Whether the output is an axis (EV_ABS or EV_REL).
    pub fn is_axis_output(&self) -> bool {
        matches!(self.output_type, Some(ev::EV_ABS) | Some(ev::EV_REL))
    }

    /// Whether the symbol disables the input outright.
    pub fn is_disabled(&self) -> bool {
        self.output_symbol.as_deref() == Some(DISABLE_SYMBOL)
    }

    /// Whether the configured symbol is macro source rather than a key name.
    pub fn is_macro_output(&self) -> bool {
        self.output_symbol
            .as_deref()
            .map_or(false, macros::is_macro)
    }

    /// Check the invariants of spec'd surface. Returns the first violation.
    pub fn validate(&self, symbols: &SymbolTable) -> Result<()> {
        let fail = |reason: String| Err(Error::InvalidMapping(reason));

        match (&self.output_symbol, self.output_type, self.output_code) {
            (Some(_), None, None) => {}
            (None, Some(_), Some(_)) => {}
            (None, _, _) => {
                return fail(format!(
                    "\"{}\" has neither an output symbol nor an output (type, code)",
                    self.label()
                ));
            }
            (Some(_), _, _) => {
                return fail(format!(
                    "\"{}\" sets both an output symbol and an output (type, code)",
                    self.label()
                ));
            }
        }

        if self.event_combination.has_analog_input() && self.output_tuple().is_none() {
            return fail(format!(
                "\"{}\" uses an axis as analog input; an explicit output (type, code) is required",
                self.label()
            ));
        }

        if let Some(symbol) = &self.output_symbol {
            if symbol != DISABLE_SYMBOL && !symbols.contains(symbol) {
                if macros::is_macro(symbol) {
                    macros::parse(symbol, symbols).map(drop)?;
                } else {
                    return Err(Error::UnknownSymbol(symbol.clone()));
                }
            }
        }

        for event in self.event_combination.iter() {
            if event.ev_type == ev::EV_ABS && event.value.abs() >= 100 {
                return fail(format!(
                    "\"{}\": trigger percent {} of an EV_ABS input must be within ±99",
                    self.label(),
                    event.value
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.deadzone) {
            return fail(format!("deadzone {} is outside [0, 1]", self.deadzone));
        }
        if !(-1.0..=1.0).contains(&self.expo) {
            return fail(format!("expo {} is outside [-1, 1]", self.expo));
        }
        if self.rel_rate == 0 {
            return fail("rel_rate must be positive".into());
        }
        if self.release_timeout <= 0.0 {
            return fail("release_timeout must be positive".into());
        }
        for (name, value) in [
            ("rel_speed", self.rel_speed),
            ("rel_wheel_speed", self.rel_wheel_speed),
            ("rel_wheel_hi_res_speed", self.rel_wheel_hi_res_speed),
            ("rel_xy_max_input", self.rel_xy_max_input),
            ("rel_wheel_max_input", self.rel_wheel_max_input),
            (
                "rel_wheel_hi_res_max_input",
                self.rel_wheel_hi_res_max_input,
            ),
        ] {
            if value <= 0.0 {
                return fail(format!("{name} must be positive, got {value}"));
            }
        }

        Ok(())
    }
}
