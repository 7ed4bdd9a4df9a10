//! Key-name → key-code lookup.
//!
//! [`SymbolTable`] is a snapshot of the evdev key constant names
//! (`KEY_*`/`BTN_*`), captured once when the injector starts and read-only
//! afterwards. Macros (`k(a)`, `m(KEY_LEFTCTRL, ...)`) and mapping
//! `output_symbol` fields resolve through it.
//!
//! Lookup is forgiving: `"KEY_A"`, `"key_a"` and the bare `"a"` all resolve
//! to the same code, since presets written by hand rarely spell the constant.

use std::collections::HashMap;

const KEY_MAX: u16 = 0x2ff;

/// Snapshot of the host's symbol-name → key-code mapping.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    codes: HashMap<String, u16>,
}

impl SymbolTable {
    /// Capture the snapshot. Call once per process.
    pub fn capture() -> Self {
        let mut codes = HashMap::new();
        for code in 1..=KEY_MAX {
            let name = format!("{:?}", evdev::Key::new(code));
            // codes without a constant render as their numeric fallback
            if !(name.starts_with("KEY_") || name.starts_with("BTN_")) {
                continue;
            }
            codes.entry(name).or_insert(code);
        }
        Self { codes }
    }

    /// Resolve a symbol name to a key code.
    pub fn get(&self, symbol: &str) -> Option<u16> {
        if let Some(code) = self.codes.get(symbol) {
            return Some(*code);
        }
        let upper = symbol.to_ascii_uppercase();
        if let Some(code) = self.codes.get(&upper) {
            return Some(*code);
        }
        if let Some(code) = self.codes.get(&format!("KEY_{upper}")) {
            return Some(*code);
        }
        self.codes.get(&format!("BTN_{upper}")).copied()
    }

    /// Whether the symbol resolves to a code.
    pub fn contains(&self, symbol: &str) -> bool {
        self.get(symbol).is_some()
    }

    /// Number of known symbols.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_constants_and_shorthand() {
        let table = SymbolTable::capture();
        let a = evdev::Key::KEY_A.code();
        assert_eq!(table.get("KEY_A"), Some(a));
        assert_eq!(table.get("key_a"), Some(a));
        assert_eq!(table.get("a"), Some(a));
        assert_eq!(table.get("A"), Some(a));
    }

    #[test]
    fn resolves_buttons() {
        let table = SymbolTable::capture();
        assert_eq!(table.get("BTN_LEFT"), Some(evdev::Key::BTN_LEFT.code()));
    }

    #[test]
    fn unknown_symbols_are_none() {
        let table = SymbolTable::capture();
        assert_eq!(table.get("KEY_DOES_NOT_EXIST"), None);
        assert_eq!(table.get(""), None);
    }

    #[test]
    fn bare_key_names_prefer_keys_over_buttons() {
        let table = SymbolTable::capture();
        // "left" could mean KEY_LEFT or BTN_LEFT; keys win
        assert_eq!(table.get("left"), Some(evdev::Key::KEY_LEFT.code()));
    }
}
