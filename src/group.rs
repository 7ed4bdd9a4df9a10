//! Logical device groups and capability-based classification.
//!
//! One physical device tends to surface as several `/dev/input/event*`
//! nodes (a keyboard with a media-key node, a gamepad with a touchpad).
//! Discovery groups the nodes by device name into a [`DeviceGroup`] with a
//! stable key; the injector treats the whole group as one unit.
//!
//! Classification is ordered from the most to the least specific capability
//! fingerprint: a stylus also reports `ABS_X`, so tablets must be recognized
//! before gamepads, and almost everything reports some `EV_KEY`, so keyboard
//! is the last resort before unknown.

use std::collections::BTreeMap;
use std::path::PathBuf;

use evdev::{AbsoluteAxisType, Key, RelativeAxisType};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::outputs::{Capabilities, DEV_NAME};

/// Coarse device kinds used for grab decisions and output capability hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    GraphicsTablet,
    Touchpad,
    Gamepad,
    Mouse,
    Keyboard,
    Unknown,
}

/// One logical physical device: a stable key, the event nodes belonging to
/// it, and what kinds of device they looked like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceGroup {
    /// Stable identifier, used by the supervisor to address the injector.
    pub key: String,
    /// Human-readable device name.
    pub name: String,
    /// All kernel event paths belonging to this device.
    pub paths: Vec<PathBuf>,
    /// Classification of each node, deduplicated.
    pub types: Vec<DeviceType>,
}

impl DeviceGroup {
    pub fn is_gamepad(&self) -> bool {
        self.types.contains(&DeviceType::Gamepad)
    }
}

fn is_gamepad(caps: &Capabilities) -> bool {
    // a few buttons that indicate a gamepad; BTN_SOUTH doubles as BTN_GAMEPAD
    let buttons = [
        Key::BTN_BASE,
        Key::BTN_SOUTH,
        Key::BTN_THUMB,
        Key::BTN_TOP,
        Key::BTN_DPAD_DOWN,
    ];
    if !buttons.iter().any(|b| caps.keys.contains(&b.code())) {
        return false;
    }
    // and joystick axes
    caps.abs.contains_key(&AbsoluteAxisType::ABS_X.0)
        && caps.abs.contains_key(&AbsoluteAxisType::ABS_Y.0)
}

fn is_mouse(caps: &Capabilities) -> bool {
    caps.rel.contains(&RelativeAxisType::REL_X.0)
        && caps.rel.contains(&RelativeAxisType::REL_Y.0)
        && caps.rel.contains(&RelativeAxisType::REL_WHEEL.0)
        && caps.keys.contains(&Key::BTN_LEFT.code())
}

fn is_graphics_tablet(caps: &Capabilities) -> bool {
    caps.keys.contains(&Key::BTN_STYLUS.code())
}

fn is_touchpad(caps: &Capabilities) -> bool {
    caps.keys.contains(&Key::BTN_TOOL_FINGER.code())
        && caps.abs.contains_key(&AbsoluteAxisType::ABS_MT_POSITION_X.0)
}

fn is_keyboard(caps: &Capabilities) -> bool {
    caps.keys.contains(&Key::KEY_A.code())
}

/// Figure out what kind of device a capability set belongs to.
pub fn classify(caps: &Capabilities) -> DeviceType {
    if is_graphics_tablet(caps) {
        // a stylus position is not a joystick
        return DeviceType::GraphicsTablet;
    }
    if is_touchpad(caps) {
        return DeviceType::Touchpad;
    }
    if is_gamepad(caps) {
        return DeviceType::Gamepad;
    }
    if is_mouse(caps) {
        return DeviceType::Mouse;
    }
    if is_keyboard(caps) {
        // last, because almost everything has some EV_KEY capability
        return DeviceType::Keyboard;
    }
    DeviceType::Unknown
}

/// Devices that must never be grabbed.
fn is_denylisted(name: &str) -> bool {
    name.to_ascii_lowercase().contains("yubikey")
}

/// Scan `/dev/input` and group the event nodes by device name.
///
/// Rebind's own virtual devices and denylisted hardware are skipped, so an
/// injector can never grab its own outputs.
pub fn discover() -> Result<Vec<DeviceGroup>> {
    let mut by_name: BTreeMap<String, DeviceGroup> = BTreeMap::new();

    for (path, device) in evdev::enumerate() {
        let name = device.name().unwrap_or("unknown").to_string();
        if name.starts_with(DEV_NAME) || is_denylisted(&name) {
            debug!("skipping \"{name}\" at {}", path.display());
            continue;
        }

        let caps = Capabilities::from_device(&device);
        let device_type = classify(&caps);

        let group = by_name.entry(name.clone()).or_insert_with(|| DeviceGroup {
            key: name.clone(),
            name: name.clone(),
            paths: Vec::new(),
            types: Vec::new(),
        });
        group.paths.push(path);
        if !group.types.contains(&device_type) {
            group.types.push(device_type);
        }
    }

    Ok(by_name.into_values().collect())
}
