//! Named, ordered collections of mappings.
//!
//! A [`Preset`] is what the injector consumes: an ordered list of
//! [`Mapping`]s plus a few preset-wide options. On disk a preset is JSON
//! (canonical) or TOML; both deserialize into the same structure.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::combination::InputCombination;
use crate::error::{Error, Result};
use crate::mapping::Mapping;
use crate::symbols::SymbolTable;

fn default_keystroke_sleep_ms() -> u64 {
    10
}

/// Preset-wide options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetOptions {
    /// Pause between the key events a macro writes, in milliseconds.
    #[serde(default = "default_keystroke_sleep_ms")]
    pub keystroke_sleep_ms: u64,
}

impl Default for PresetOptions {
    fn default() -> Self {
        Self {
            keystroke_sleep_ms: default_keystroke_sleep_ms(),
        }
    }
}

/// Serializable preset: a named, ordered collection of mappings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    /// Schema version for forward migrations.
    #[serde(default)]
    pub version: u16,
    /// Human-readable preset name.
    #[serde(default)]
    pub name: String,
    /// Preset-wide options.
    #[serde(default)]
    pub options: PresetOptions,
    /// The rules, in the order they were written.
    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

impl Preset {
    pub fn new(name: &str) -> Self {
        Self {
            version: 1,
            name: name.to_string(),
            options: PresetOptions::default(),
            mappings: Vec::new(),
        }
    }

    /// Load from a `.json` or `.toml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&text).map_err(|e| Error::Other(format!("{}: {e}", path.display())))
        } else {
            serde_json::from_str(&text)
                .map_err(|e| Error::Other(format!("{}: {e}", path.display())))
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("failed to serialize preset: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn add(&mut self, mapping: Mapping) {
        self.mappings.push(mapping);
    }

    /// Iterate `(combination, mapping)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&InputCombination, &Mapping)> {
        self.mappings.iter().map(|m| (&m.event_combination, m))
    }

    /// Whether any mapping uses a joystick axis as analog input.
    pub fn maps_joystick(&self) -> bool {
        self.mappings.iter().any(|m| {
            m.event_combination
                .find_analog_input(Some(crate::event::ev::EV_ABS))
                .is_some()
        })
    }

    /// Validate all mappings against the symbol snapshot.
    ///
    /// Returns the labels and errors of the mappings that failed; callers
    /// decide whether that is fatal (editor) or a drop-and-continue (injector).
    pub fn validate(&self, symbols: &SymbolTable) -> Vec<(String, Error)> {
        let mut errors = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for mapping in &self.mappings {
            let key = mapping.event_combination.json_key();
            if !seen.insert(key.clone()) {
                errors.push((
                    mapping.label(),
                    Error::InvalidMapping(format!("duplicate combination \"{key}\"")),
                ));
                continue;
            }
            if mapping.event_combination.is_problematic() {
                warn!(
                    "combination \"{}\" contains ctrl/shift/alt and may misbehave",
                    mapping.event_combination
                );
            }
            if let Err(error) = mapping.validate(symbols) {
                errors.push((mapping.label(), error));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ev;

    fn preset() -> Preset {
        let mut preset = Preset::new("test");
        preset.add(Mapping::key_output(
            InputCombination::parse("1,30,1").unwrap(),
            "keyboard",
            "KEY_B",
        ));
        preset.add(Mapping::code_output(
            InputCombination::parse("3,0,0").unwrap(),
            "mouse",
            ev::EV_REL,
            0,
        ));
        preset
    }

    #[test]
    fn iterates_in_insertion_order() {
        let preset = preset();
        let combis: Vec<String> = preset.iter().map(|(c, _)| c.json_key()).collect();
        assert_eq!(combis, vec!["1,30,1", "3,0,0"]);
    }

    #[test]
    fn joystick_detection_looks_for_analog_abs() {
        assert!(preset().maps_joystick());
        let mut keys_only = Preset::new("keys");
        keys_only.add(Mapping::key_output(
            InputCombination::parse("1,30,1").unwrap(),
            "keyboard",
            "KEY_B",
        ));
        assert!(!keys_only.maps_joystick());
    }

    #[test]
    fn validation_reports_duplicates_and_bad_mappings() {
        let symbols = SymbolTable::capture();
        let mut preset = preset();
        preset.add(Mapping::key_output(
            InputCombination::parse("1,30,1").unwrap(),
            "keyboard",
            "KEY_C",
        ));
        preset.add(Mapping::key_output(
            InputCombination::parse("1,31,1").unwrap(),
            "keyboard",
            "KEY_GIBBERISH",
        ));
        let errors = preset.validate(&symbols);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn json_round_trip_is_equivalent() {
        let preset = preset();
        let json = serde_json::to_string(&preset).unwrap();
        let back: Preset = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mappings.len(), preset.mappings.len());
        for (a, b) in back.mappings.iter().zip(&preset.mappings) {
            assert_eq!(a.event_combination, b.event_combination);
            assert_eq!(a.target_uinput, b.target_uinput);
        }
    }

    #[test]
    fn toml_presets_load_too() {
        let toml_text = r#"
            version = 1
            name = "toml"

            [[mappings]]
            event_combination = "1,30,1"
            target_uinput = "keyboard"
            output_symbol = "KEY_B"
        "#;
        let preset: Preset = toml::from_str(toml_text).unwrap();
        assert_eq!(preset.mappings.len(), 1);
        assert_eq!(preset.mappings[0].target_uinput, "keyboard");
    }
}
