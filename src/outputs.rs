//! Named virtual output devices.
//!
//! Handlers never talk to `uinput` directly; they write `(type, code, value)`
//! tuples to a named output (`"keyboard"`, `"mouse"`, `"gamepad"`) through the
//! [`VirtualOutputs`] registry. Each output carries a fixed capability set —
//! a template for its kind merged with whatever the preset's mappings and
//! macros inject — so the host classifies the virtual device correctly.
//!
//! The actual kernel device sits behind the small [`UinputSink`] trait;
//! production uses an `evdev` uinput device, tests plug in a
//! [`RecordingSink`].

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::rc::Rc;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AbsInfo, AbsoluteAxisType, AttributeSet, Key, RelativeAxisType, UinputAbsSetup};
use log::{debug, error, warn};

use crate::error::{Error, Result};
use crate::event::ev;

/// Prefix of every virtual device rebind creates.
pub const DEV_NAME: &str = "rebind";

/// The kernel rejects uinput names longer than this.
const MAX_UDEV_NAME_LEN: usize = 80;

/// `"rebind <middle> <suffix>"`, truncating the middle to stay within the
/// kernel's name limit.
pub fn udev_name(name: &str, suffix: &str) -> String {
    let remaining = MAX_UDEV_NAME_LEN - DEV_NAME.len() - suffix.len() - 2;
    let middle: String = name.chars().take(remaining).collect();
    format!("{DEV_NAME} {middle} {suffix}")
}

/// Range metadata of one absolute axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsRange {
    pub min: i32,
    pub max: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

impl AbsRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self {
            min,
            max,
            fuzz: 0,
            flat: 0,
            resolution: 0,
        }
    }

    /// The neutral (centered) value of this axis.
    pub fn neutral(&self) -> i32 {
        self.min + (self.max - self.min) / 2
    }
}

/// Capability set of one device: which keys, relative and absolute axes it
/// can emit.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub keys: BTreeSet<u16>,
    pub rel: BTreeSet<u16>,
    pub abs: BTreeMap<u16, AbsRange>,
}

impl Capabilities {
    /// Snapshot the capabilities of a source device.
    ///
    /// `EV_SYN` and `EV_FF` never make it into this representation, and
    /// `ABS_VOLUME` is stripped: mirroring it onto a forward device prevents
    /// hosts from recognizing mice and keyboards.
    pub fn from_device(device: &evdev::Device) -> Self {
        let mut caps = Self::default();

        if let Some(keys) = device.supported_keys() {
            caps.keys.extend(keys.iter().map(|k| k.code()));
        }
        if let Some(rel) = device.supported_relative_axes() {
            caps.rel.extend(rel.iter().map(|r| r.0));
        }
        if let Some(abs) = device.supported_absolute_axes() {
            let abs_state = device.get_abs_state().ok();
            for axis in abs.iter() {
                if axis == AbsoluteAxisType::ABS_VOLUME {
                    continue;
                }
                let range = abs_state
                    .as_ref()
                    .map(|state| {
                        let info = state[axis.0 as usize];
                        AbsRange {
                            min: info.minimum,
                            max: info.maximum,
                            fuzz: info.fuzz,
                            flat: info.flat,
                            resolution: info.resolution,
                        }
                    })
                    .unwrap_or_else(|| AbsRange::new(-1, 1));
                caps.abs.insert(axis.0, range);
            }
        }

        caps
    }

    /// Whether events of this `(type, code)` can be emitted.
    pub fn supports(&self, ev_type: u16, code: u16) -> bool {
        match ev_type {
            ev::EV_KEY => self.keys.contains(&code),
            ev::EV_REL => self.rel.contains(&code),
            ev::EV_ABS => self.abs.contains_key(&code),
            ev::EV_SYN => true,
            _ => false,
        }
    }

    /// Union `other` into self. Absolute ranges of `other` win on conflict.
    pub fn merge(&mut self, other: &Capabilities) {
        self.keys.extend(other.keys.iter().copied());
        self.rel.extend(other.rel.iter().copied());
        for (code, range) in &other.abs {
            self.abs.insert(*code, *range);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.rel.is_empty() && self.abs.is_empty()
    }

    /// Create the kernel uinput device for this capability set.
    pub fn create_uinput(&self, name: &str) -> io::Result<VirtualDevice> {
        let mut builder = VirtualDeviceBuilder::new()?.name(name);

        if !self.keys.is_empty() {
            let keys: AttributeSet<Key> = self.keys.iter().map(|c| Key::new(*c)).collect();
            builder = builder.with_keys(&keys)?;
        }
        if !self.rel.is_empty() {
            let rel: AttributeSet<RelativeAxisType> =
                self.rel.iter().map(|c| RelativeAxisType(*c)).collect();
            builder = builder.with_relative_axes(&rel)?;
        }
        for (code, range) in &self.abs {
            let info = AbsInfo::new(
                range.neutral(),
                range.min,
                range.max,
                range.fuzz,
                range.flat,
                range.resolution,
            );
            builder =
                builder.with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisType(*code), info))?;
        }

        builder.build()
    }
}

/// The kinds of outputs the registry knows templates for.
///
/// Templates exist so the host recognizes the device: a mouse is only a mouse
/// with `REL_X`/`REL_Y`/`REL_WHEEL` and a click button, a gamepad needs its
/// joystick axes, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Keyboard,
    Mouse,
    Gamepad,
}

impl OutputKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "keyboard" => Some(Self::Keyboard),
            "mouse" => Some(Self::Mouse),
            "gamepad" => Some(Self::Gamepad),
            _ => None,
        }
    }

    /// The baseline capability set of this kind.
    pub fn template(self) -> Capabilities {
        let mut caps = Capabilities::default();
        match self {
            Self::Keyboard => {
                // the full keyboard key range, like a reference USB keyboard
                caps.keys.extend(1..=248u16);
            }
            Self::Mouse => {
                caps.rel.extend([
                    RelativeAxisType::REL_X.0,
                    RelativeAxisType::REL_Y.0,
                    RelativeAxisType::REL_WHEEL.0,
                    RelativeAxisType::REL_HWHEEL.0,
                    RelativeAxisType::REL_WHEEL_HI_RES.0,
                    RelativeAxisType::REL_HWHEEL_HI_RES.0,
                ]);
                caps.keys.extend([
                    Key::BTN_LEFT.code(),
                    Key::BTN_RIGHT.code(),
                    Key::BTN_MIDDLE.code(),
                    Key::BTN_SIDE.code(),
                    Key::BTN_EXTRA.code(),
                ]);
            }
            Self::Gamepad => {
                let stick = AbsRange::new(-32768, 32767);
                let trigger = AbsRange::new(0, 255);
                let hat = AbsRange::new(-1, 1);
                caps.abs.extend([
                    (AbsoluteAxisType::ABS_X.0, stick),
                    (AbsoluteAxisType::ABS_Y.0, stick),
                    (AbsoluteAxisType::ABS_RX.0, stick),
                    (AbsoluteAxisType::ABS_RY.0, stick),
                    (AbsoluteAxisType::ABS_Z.0, trigger),
                    (AbsoluteAxisType::ABS_RZ.0, trigger),
                    (AbsoluteAxisType::ABS_HAT0X.0, hat),
                    (AbsoluteAxisType::ABS_HAT0Y.0, hat),
                ]);
                caps.keys.extend([
                    Key::BTN_SOUTH.code(),
                    Key::BTN_EAST.code(),
                    Key::BTN_NORTH.code(),
                    Key::BTN_WEST.code(),
                    Key::BTN_TL.code(),
                    Key::BTN_TR.code(),
                    Key::BTN_TL2.code(),
                    Key::BTN_TR2.code(),
                    Key::BTN_SELECT.code(),
                    Key::BTN_START.code(),
                    Key::BTN_MODE.code(),
                    Key::BTN_THUMBL.code(),
                    Key::BTN_THUMBR.code(),
                ]);
            }
        }
        caps
    }
}

/// Destination for produced events. Production wraps an `evdev` uinput
/// device; tests record.
pub trait UinputSink {
    fn write_event(&mut self, ev_type: u16, code: u16, value: i32) -> io::Result<()>;
}

impl UinputSink for VirtualDevice {
    fn write_event(&mut self, ev_type: u16, code: u16, value: i32) -> io::Result<()> {
        // emit() appends the SYN_REPORT
        self.emit(&[evdev::InputEvent::new(
            evdev::EventType(ev_type),
            code,
            value,
        )])
    }
}

/// In-memory sink that records every event. Used by the test suite and by
/// dry runs.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<(u16, u16, i32)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events written so far.
    pub fn events(&self) -> Vec<(u16, u16, i32)> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl UinputSink for RecordingSink {
    fn write_event(&mut self, ev_type: u16, code: u16, value: i32) -> io::Result<()> {
        self.events.borrow_mut().push((ev_type, code, value));
        Ok(())
    }
}

struct Output {
    capabilities: Capabilities,
    sink: RefCell<Box<dyn UinputSink>>,
    /// `(type, code)` of key events currently written as pressed.
    held: RefCell<HashSet<u16>>,
}

/// The set of named virtual outputs of one injector.
///
/// All writes go through [`VirtualOutputs::write`], which checks the target
/// exists and has the capability, so a broken mapping cannot wedge a uinput.
#[derive(Default)]
pub struct VirtualOutputs {
    outputs: HashMap<String, Output>,
}

impl VirtualOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the kernel device for `name` and register it.
    pub fn create(&mut self, name: &str, capabilities: Capabilities) -> Result<()> {
        let device = capabilities.create_uinput(&udev_name(name, "mapped"))?;
        debug!("created uinput \"{name}\"");
        self.register(name, capabilities, Box::new(device));
        Ok(())
    }

    /// Register an already-constructed sink (tests, dry runs).
    pub fn register(&mut self, name: &str, capabilities: Capabilities, sink: Box<dyn UinputSink>) {
        self.outputs.insert(
            name.to_string(),
            Output {
                capabilities,
                sink: RefCell::new(sink),
                held: RefCell::new(HashSet::new()),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.outputs.contains_key(name)
    }

    /// Write one event to the named output.
    pub fn write(&self, event: (u16, u16, i32), target: &str) -> Result<()> {
        let (ev_type, code, value) = event;
        let output = self
            .outputs
            .get(target)
            .ok_or_else(|| Error::UinputNotAvailable(target.to_string()))?;

        if !output.capabilities.supports(ev_type, code) {
            return Err(Error::EventNotHandled {
                target: target.to_string(),
                ev_type,
                code,
            });
        }

        output.sink.borrow_mut().write_event(ev_type, code, value)?;

        if ev_type == ev::EV_KEY {
            if value == 0 {
                output.held.borrow_mut().remove(&code);
            } else {
                output.held.borrow_mut().insert(code);
            }
        }
        Ok(())
    }

    /// Absinfo of an output axis, for scaling onto its range.
    pub fn get_absinfo(&self, target: &str, code: u16) -> Result<AbsRange> {
        let output = self
            .outputs
            .get(target)
            .ok_or_else(|| Error::UinputNotAvailable(target.to_string()))?;
        output
            .capabilities
            .abs
            .get(&code)
            .copied()
            .ok_or(Error::EventNotHandled {
                target: target.to_string(),
                ev_type: ev::EV_ABS,
                code,
            })
    }

    /// Release everything still held, on every output.
    ///
    /// Called during shutdown after the handlers were reset, so a crashed or
    /// interrupted injection never leaves a key pressed forever.
    pub fn reset(&self) {
        for (name, output) in &self.outputs {
            let held: Vec<u16> = output.held.borrow().iter().copied().collect();
            for code in held {
                if let Err(e) = output.sink.borrow_mut().write_event(ev::EV_KEY, code, 0) {
                    error!("failed to release ({}, {code}) on \"{name}\": {e}", ev::EV_KEY);
                }
            }
            output.held.borrow_mut().clear();
        }
    }

    /// Names of all registered outputs.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.outputs.keys()
    }
}

impl Drop for VirtualOutputs {
    fn drop(&mut self) {
        self.reset();
    }
}

/// The forward device of one source: a uinput mirroring the source's
/// capabilities, receiving everything the handler graph did not claim.
#[derive(Clone)]
pub struct ForwardOutput {
    name: String,
    sink: Rc<RefCell<Box<dyn UinputSink>>>,
}

impl ForwardOutput {
    /// Create the kernel forward device for a grabbed source.
    pub fn create(source_name: &str, capabilities: &Capabilities) -> Result<Self> {
        let device = capabilities.create_uinput(&udev_name(source_name, "forwarded"))?;
        Ok(Self::from_sink(source_name, Box::new(device)))
    }

    /// Wrap an existing sink (tests).
    pub fn from_sink(source_name: &str, sink: Box<dyn UinputSink>) -> Self {
        Self {
            name: source_name.to_string(),
            sink: Rc::new(RefCell::new(sink)),
        }
    }

    /// Forward one event. Failures are logged, not propagated: a vanished
    /// forward device must not take the reader down.
    pub fn write(&self, ev_type: u16, code: u16, value: i32) {
        if let Err(e) = self.sink.borrow_mut().write_event(ev_type, code, value) {
            warn!("forwarding ({ev_type}, {code}, {value}) for \"{}\" failed: {e}", self.name);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(name: &str, caps: Capabilities) -> (VirtualOutputs, RecordingSink) {
        let sink = RecordingSink::new();
        let mut outputs = VirtualOutputs::new();
        outputs.register(name, caps, Box::new(sink.clone()));
        (outputs, sink)
    }

    #[test]
    fn write_respects_the_capability_set() {
        let (outputs, sink) = registry_with("keyboard", OutputKind::Keyboard.template());

        outputs.write((ev::EV_KEY, 30, 1), "keyboard").unwrap();
        assert_eq!(sink.events(), vec![(ev::EV_KEY, 30, 1)]);

        let err = outputs
            .write((ev::EV_REL, 0, 1), "keyboard")
            .unwrap_err();
        assert!(matches!(err, Error::EventNotHandled { .. }));

        let err = outputs.write((ev::EV_KEY, 30, 1), "missing").unwrap_err();
        assert!(matches!(err, Error::UinputNotAvailable(_)));
    }

    #[test]
    fn reset_releases_held_keys_once() {
        let (outputs, sink) = registry_with("keyboard", OutputKind::Keyboard.template());
        outputs.write((ev::EV_KEY, 30, 1), "keyboard").unwrap();
        outputs.write((ev::EV_KEY, 31, 1), "keyboard").unwrap();
        outputs.write((ev::EV_KEY, 31, 0), "keyboard").unwrap();
        sink.clear();

        outputs.reset();
        assert_eq!(sink.events(), vec![(ev::EV_KEY, 30, 0)]);

        sink.clear();
        outputs.reset();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn templates_make_devices_recognizable() {
        let mouse = OutputKind::Mouse.template();
        for code in [
            RelativeAxisType::REL_X.0,
            RelativeAxisType::REL_Y.0,
            RelativeAxisType::REL_WHEEL.0,
        ] {
            assert!(mouse.supports(ev::EV_REL, code));
        }
        assert!(mouse.supports(ev::EV_KEY, Key::BTN_LEFT.code()));

        let gamepad = OutputKind::Gamepad.template();
        assert!(gamepad.supports(ev::EV_ABS, AbsoluteAxisType::ABS_X.0));
        assert!(gamepad.supports(ev::EV_KEY, Key::BTN_SOUTH.code()));
    }

    #[test]
    fn absinfo_is_served_from_the_capability_set() {
        let (outputs, _) = registry_with("gamepad", OutputKind::Gamepad.template());
        let range = outputs
            .get_absinfo("gamepad", AbsoluteAxisType::ABS_X.0)
            .unwrap();
        assert_eq!((range.min, range.max), (-32768, 32767));
        assert!(outputs.get_absinfo("gamepad", 0x3f).is_err());
    }

    #[test]
    fn udev_names_stay_within_the_kernel_limit() {
        let long = "x".repeat(200);
        let name = udev_name(&long, "forwarded");
        assert!(name.len() <= MAX_UDEV_NAME_LEN);
        assert!(name.starts_with("rebind "));
        assert!(name.ends_with(" forwarded"));
    }
}
