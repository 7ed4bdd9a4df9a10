//! The macro language parser.
//!
//! Source is ASCII, whitespace-insensitive, quoting-free:
//!
//! - `k(a)` press+release a key
//! - `e(EV_REL, REL_X, 10)` write an arbitrary event
//! - `w(100)` wait (abortable by release)
//! - `h()` / `h(a)` / `h(k(a).k(b))` hold until release
//! - `hold_keys(BTN_LEFT, BTN_RIGHT)` hold several keys
//! - `m(KEY_LEFTCTRL, k(c))` run with a modifier held
//! - `r(3, k(a))` repeat
//! - `mouse(left, 4)` / `wheel(down, 2)` relative bursts while held
//! - `set(x, 1)` / `ifeq(x, 1, k(a), k(b))` shared variables
//! - `a + b + c` sugar for `m(a, m(b, m(c, h())))`
//!
//! Compilation is a recursive descent over the brace-nested call syntax.
//! Unknown functions, argument-count mismatches and unresolved symbols are
//! reported as compile-time errors; nothing is deferred to run time.

use std::cell::Cell;
use std::rc::Rc;

use evdev::{AbsoluteAxisType, RelativeAxisType};

use super::{Macro, Task, Value};
use crate::error::{Error, Result};
use crate::event::ev;
use crate::outputs::Capabilities;
use crate::symbols::SymbolTable;

const DEFAULT_KEYSTROKE_SLEEP_MS: u64 = 10;

/// Figure out whether an output symbol is macro source rather than a key name.
pub fn is_macro(output: &str) -> bool {
    let trimmed = output.trim();
    if trimmed.contains('+') {
        // for example "a + b"
        return true;
    }
    trimmed.contains('(') && trimmed.contains(')') && trimmed.len() >= 4
}

/// Compile macro source into a [`Macro`].
pub fn parse(code: &str, symbols: &SymbolTable) -> Result<Macro> {
    let fail = |reason: String| Error::MacroParse {
        source_code: code.to_string(),
        reason,
    };

    let expanded = handle_plus_syntax(code).map_err(&fail)?;
    // whitespace and quotes serve no purpose in this grammar
    let cleaned: String = expanded
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '"' && *c != '\'')
        .collect();
    if cleaned.is_empty() {
        return Err(fail("empty macro".into()));
    }

    let sleep = Rc::new(Cell::new(DEFAULT_KEYSTROKE_SLEEP_MS));
    let mut builder = MacroBuilder::new(symbols, Rc::clone(&sleep));
    builder.parse_calls(&cleaned).map_err(&fail)?;
    Ok(builder.finish(Some(code.to_string())))
}

/// Transform `a + b + c` into `m(a, m(b, m(c, h())))`.
fn handle_plus_syntax(code: &str) -> core::result::Result<String, String> {
    if !code.contains('+') {
        return Ok(code.to_string());
    }
    if code.contains('(') || code.contains(')') {
        return Err("mixing \"+\" and calls is unsupported".into());
    }

    let chunks: Vec<&str> = code.split('+').map(str::trim).collect();
    if chunks.iter().any(|c| c.is_empty()) {
        return Err("dangling \"+\"".into());
    }

    let mut output = String::new();
    for chunk in &chunks {
        output.push_str(&format!("m({chunk},"));
    }
    output.push_str("h()");
    output.push_str(&")".repeat(chunks.len()));
    Ok(output)
}

/// What a single parameter resolved to.
enum Param {
    Macro(Rc<Macro>),
    Int(i64),
    Symbol(String),
}

impl Param {
    fn describe(&self) -> &'static str {
        match self {
            Param::Macro(_) => "a macro",
            Param::Int(_) => "a number",
            Param::Symbol(_) => "a symbol",
        }
    }
}

struct MacroBuilder<'a> {
    symbols: &'a SymbolTable,
    keystroke_sleep_ms: Rc<Cell<u64>>,
    tasks: Vec<Task>,
    children: Vec<Rc<Macro>>,
    capabilities: Capabilities,
}

impl<'a> MacroBuilder<'a> {
    fn new(symbols: &'a SymbolTable, keystroke_sleep_ms: Rc<Cell<u64>>) -> Self {
        Self {
            symbols,
            keystroke_sleep_ms,
            tasks: Vec::new(),
            children: Vec::new(),
            capabilities: Capabilities::default(),
        }
    }

    fn finish(self, code: Option<String>) -> Macro {
        Macro::new(
            code,
            self.tasks,
            self.children,
            self.capabilities,
            self.keystroke_sleep_ms,
        )
    }

    /// Parse a `name(...)` chain like `k(a).w(10).k(b)`.
    fn parse_calls(&mut self, source: &str) -> core::result::Result<(), String> {
        let mut rest = source;
        loop {
            let open = rest
                .find('(')
                .ok_or_else(|| format!("expected a call, got \"{rest}\""))?;
            let name = &rest[..open];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!("\"{name}\" is not a function name"));
            }

            let close = matching_bracket(rest, open)?;
            let inner = &rest[open + 1..close];
            let params = split_params(inner)
                .into_iter()
                .map(|p| self.parse_param(p))
                .collect::<core::result::Result<Vec<_>, String>>()?;

            self.add_call(name, params)?;

            rest = &rest[close + 1..];
            match rest.chars().next() {
                None => return Ok(()),
                Some('.') => rest = &rest[1..],
                Some(c) => return Err(format!("unexpected \"{c}\" after \"{name}(...)\"")),
            }
        }
    }

    /// A parameter is a nested macro, a number, or a bare symbol.
    fn parse_param(&mut self, param: &str) -> core::result::Result<Option<Param>, String> {
        if param.is_empty() {
            return Ok(None);
        }
        if param.contains('(') {
            let mut builder = MacroBuilder::new(self.symbols, Rc::clone(&self.keystroke_sleep_ms));
            builder.parse_calls(param)?;
            return Ok(Some(Param::Macro(Rc::new(builder.finish(None)))));
        }
        if let Ok(number) = param.parse::<i64>() {
            return Ok(Some(Param::Int(number)));
        }
        Ok(Some(Param::Symbol(param.to_string())))
    }

    fn add_call(
        &mut self,
        name: &str,
        params: Vec<Option<Param>>,
    ) -> core::result::Result<(), String> {
        // `h()` legitimately receives zero parameters
        let given = params.iter().filter(|p| p.is_some()).count();
        let arity = move |min: usize, max: usize| -> core::result::Result<(), String> {
            if given < min || given > max {
                if min == max {
                    Err(format!("{name} takes {min}, not {given} parameters"))
                } else {
                    Err(format!(
                        "{name} takes between {min} and {max}, not {given} parameters"
                    ))
                }
            } else {
                Ok(())
            }
        };
        let mut params = params.into_iter().flatten();

        match name {
            "k" => {
                arity(1, 1)?;
                let code = self.key_code_for(name, params.next())?;
                self.capabilities.keys.insert(code);
                self.tasks.push(Task::Key { code });
            }
            "e" => {
                arity(3, 3)?;
                let (ev_type, code) = self.event_code(params.next(), params.next())?;
                let value = match params.next() {
                    Some(Param::Int(v)) => v as i32,
                    other => return Err(expected(name, "a number", other)),
                };
                self.add_event_capability(ev_type, code);
                self.tasks.push(Task::Event {
                    ev_type,
                    code,
                    value,
                });
            }
            "w" => {
                arity(1, 1)?;
                let ms = match params.next() {
                    Some(Param::Int(ms)) if ms >= 0 => ms as u64,
                    other => return Err(expected(name, "a number", other)),
                };
                self.tasks.push(Task::Wait { ms });
            }
            "h" => {
                arity(0, 1)?;
                match params.next() {
                    None => self.tasks.push(Task::HoldBlock),
                    Some(Param::Macro(child)) => {
                        self.add_child(&child);
                        self.tasks.push(Task::HoldRepeat { child });
                    }
                    Some(param) => {
                        let code = self.key_code_for(name, Some(param))?;
                        self.capabilities.keys.insert(code);
                        self.tasks.push(Task::HoldKey { code });
                    }
                }
            }
            "hold_keys" => {
                arity(1, usize::MAX)?;
                let codes = params
                    .map(|p| self.key_code_for(name, Some(p)))
                    .collect::<core::result::Result<Vec<_>, String>>()?;
                self.capabilities.keys.extend(codes.iter().copied());
                self.tasks.push(Task::HoldKeys { codes });
            }
            "m" => {
                arity(2, 2)?;
                let code = self.key_code_for(name, params.next())?;
                let child = match params.next() {
                    Some(Param::Macro(child)) => child,
                    other => return Err(expected(name, "a macro (like k(a))", other)),
                };
                self.capabilities.keys.insert(code);
                self.add_child(&child);
                self.tasks.push(Task::Modify { code, child });
            }
            "r" => {
                arity(2, 2)?;
                let count = match params.next() {
                    Some(Param::Int(n)) if n >= 0 => n as u32,
                    other => return Err(expected(name, "a number", other)),
                };
                let child = match params.next() {
                    Some(Param::Macro(child)) => child,
                    other => return Err(expected(name, "a macro (like k(a))", other)),
                };
                self.add_child(&child);
                self.tasks.push(Task::Repeat { count, child });
            }
            "mouse" => {
                arity(2, 2)?;
                let (code, value) = match params.next() {
                    Some(Param::Symbol(dir)) => match dir.to_ascii_lowercase().as_str() {
                        "up" => (RelativeAxisType::REL_Y.0, -1),
                        "down" => (RelativeAxisType::REL_Y.0, 1),
                        "left" => (RelativeAxisType::REL_X.0, -1),
                        "right" => (RelativeAxisType::REL_X.0, 1),
                        other => return Err(format!("unknown mouse direction \"{other}\"")),
                    },
                    other => return Err(expected(name, "a direction", other)),
                };
                let speed = match params.next() {
                    Some(Param::Int(speed)) if speed > 0 => speed as i32,
                    other => return Err(expected(name, "a speed", other)),
                };
                let child = self.event_burst(ev::EV_REL, code, value * speed, None);
                self.tasks.push(Task::HoldRepeat { child });
            }
            "wheel" => {
                arity(2, 2)?;
                let (code, value) = match params.next() {
                    Some(Param::Symbol(dir)) => match dir.to_ascii_lowercase().as_str() {
                        "up" => (RelativeAxisType::REL_WHEEL.0, 1),
                        "down" => (RelativeAxisType::REL_WHEEL.0, -1),
                        "left" => (RelativeAxisType::REL_HWHEEL.0, 1),
                        "right" => (RelativeAxisType::REL_HWHEEL.0, -1),
                        other => return Err(format!("unknown wheel direction \"{other}\"")),
                    },
                    other => return Err(expected(name, "a direction", other)),
                };
                let speed = match params.next() {
                    Some(Param::Int(speed)) if speed > 0 => speed as u64,
                    other => return Err(expected(name, "a speed", other)),
                };
                let child = self.event_burst(ev::EV_REL, code, value, Some(100 / speed));
                self.tasks.push(Task::HoldRepeat { child });
            }
            "set" => {
                arity(2, 2)?;
                let var = match params.next() {
                    Some(Param::Symbol(var)) => var,
                    other => return Err(expected(name, "a variable name", other)),
                };
                let value = match params.next() {
                    Some(Param::Int(n)) => Value::Int(n),
                    Some(Param::Symbol(s)) => Value::Str(s),
                    other => return Err(expected(name, "a value", other)),
                };
                self.tasks.push(Task::Set { var, value });
            }
            "ifeq" => {
                arity(3, 4)?;
                let var = match params.next() {
                    Some(Param::Symbol(var)) => var,
                    other => return Err(expected(name, "a variable name", other)),
                };
                let value = match params.next() {
                    Some(Param::Int(n)) => Value::Int(n),
                    Some(Param::Symbol(s)) => Value::Str(s),
                    other => return Err(expected(name, "a value", other)),
                };
                let then = match params.next() {
                    Some(Param::Macro(child)) => {
                        self.add_child(&child);
                        Some(child)
                    }
                    other => return Err(expected(name, "a macro (like k(a))", other)),
                };
                let otherwise = match params.next() {
                    None => None,
                    Some(Param::Macro(child)) => {
                        self.add_child(&child);
                        Some(child)
                    }
                    other => return Err(expected(name, "a macro (like k(a))", other)),
                };
                self.tasks.push(Task::IfEq {
                    var,
                    value,
                    then,
                    otherwise,
                });
            }
            unknown => return Err(format!("unknown function \"{unknown}\"")),
        }

        Ok(())
    }

    /// A child macro of one repeated event (plus optional wait), as used by
    /// `mouse()` and `wheel()`.
    fn event_burst(&mut self, ev_type: u16, code: u16, value: i32, wait_ms: Option<u64>) -> Rc<Macro> {
        let mut builder = MacroBuilder::new(self.symbols, Rc::clone(&self.keystroke_sleep_ms));
        builder.add_event_capability(ev_type, code);
        builder.tasks.push(Task::Event {
            ev_type,
            code,
            value,
        });
        if let Some(ms) = wait_ms {
            builder.tasks.push(Task::Wait { ms });
        }
        let child = Rc::new(builder.finish(None));
        self.add_child(&child);
        child
    }

    fn add_child(&mut self, child: &Rc<Macro>) {
        self.capabilities.merge(child.capabilities());
        self.children.push(Rc::clone(child));
    }

    fn add_event_capability(&mut self, ev_type: u16, code: u16) {
        match ev_type {
            ev::EV_KEY => {
                self.capabilities.keys.insert(code);
            }
            ev::EV_REL => {
                self.capabilities.rel.insert(code);
                // required for the host to recognize the device as a mouse
                self.capabilities.rel.insert(RelativeAxisType::REL_X.0);
                self.capabilities.rel.insert(RelativeAxisType::REL_Y.0);
                self.capabilities.rel.insert(RelativeAxisType::REL_WHEEL.0);
            }
            ev::EV_ABS => {
                self.capabilities
                    .abs
                    .insert(code, crate::outputs::AbsRange::new(-32768, 32767));
            }
            _ => {}
        }
    }

    fn key_code_for(&self, call: &str, param: Option<Param>) -> core::result::Result<u16, String> {
        match param {
            Some(Param::Symbol(symbol)) => self
                .symbols
                .get(&symbol)
                .ok_or_else(|| format!("unknown key \"{symbol}\"")),
            Some(Param::Int(code)) if (0..=0x2ff).contains(&code) => Ok(code as u16),
            other => Err(expected(call, "a key name", other)),
        }
    }

    /// Resolve the `(type, code)` params of `e()`. Both accept numbers or
    /// constant names (`EV_REL`, `REL_X`, `KEY_A`, `ABS_X`, ...).
    fn event_code(
        &self,
        ev_type: Option<Param>,
        code: Option<Param>,
    ) -> core::result::Result<(u16, u16), String> {
        let ev_type = match ev_type {
            Some(Param::Int(t)) => t as u16,
            Some(Param::Symbol(name)) => match name.to_ascii_uppercase().as_str() {
                "EV_KEY" => ev::EV_KEY,
                "EV_REL" => ev::EV_REL,
                "EV_ABS" => ev::EV_ABS,
                other => return Err(format!("unknown event type \"{other}\"")),
            },
            other => return Err(expected("e", "an event type", other)),
        };

        let code = match code {
            Some(Param::Int(c)) => c as u16,
            Some(Param::Symbol(name)) => {
                let upper = name.to_ascii_uppercase();
                match ev_type {
                    ev::EV_KEY => self
                        .symbols
                        .get(&upper)
                        .ok_or_else(|| format!("unknown key \"{name}\""))?,
                    ev::EV_REL => rel_axis_code(&upper)
                        .ok_or_else(|| format!("unknown relative axis \"{name}\""))?,
                    ev::EV_ABS => abs_axis_code(&upper)
                        .ok_or_else(|| format!("unknown absolute axis \"{name}\""))?,
                    _ => return Err(format!("cannot resolve \"{name}\" for type {ev_type}")),
                }
            }
            other => return Err(expected("e", "an event code", other)),
        };

        Ok((ev_type, code))
    }
}

fn expected(call: &str, what: &str, got: Option<Param>) -> String {
    match got {
        Some(param) => format!("expected {what} for {call}, but got {}", param.describe()),
        None => format!("expected {what} for {call}, but got nothing"),
    }
}

/// Resolve `REL_*` constant names through the evdev constants.
fn rel_axis_code(name: &str) -> Option<u16> {
    (0u16..=0x0f).find(|code| format!("{:?}", RelativeAxisType(*code)) == name)
}

/// Resolve `ABS_*` constant names through the evdev constants.
fn abs_axis_code(name: &str) -> Option<u16> {
    (0u16..=0x3f).find(|code| format!("{:?}", AbsoluteAxisType(*code)) == name)
}

/// Find the index of the bracket closing the one at `open`.
fn matching_bracket(source: &str, open: usize) -> core::result::Result<usize, String> {
    let mut depth = 0;
    for (i, c) in source.char_indices() {
        if i < open {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(format!("unbalanced brackets in \"{source}\""))
}

/// Split `"3, k(a).w(10)"` into parameters at top-level commas.
fn split_params(inner: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                params.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&inner[start..]);
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols() -> SymbolTable {
        SymbolTable::capture()
    }

    #[test]
    fn detects_macros() {
        assert!(is_macro("k(a)"));
        assert!(is_macro("a + b"));
        assert!(is_macro("r(2, k(a).k(b))"));
        assert!(!is_macro("KEY_A"));
        assert!(!is_macro("()"));
    }

    #[test]
    fn parses_the_readme_examples() {
        let table = symbols();
        parse("r(3, k(a).w(10))", &table).unwrap();
        parse("r(2, k(a).k(minus)).k(b)", &table).unwrap();
        parse("w(1000).m(KEY_RIGHTSHIFT, r(2, k(a))).w(10).k(b)", &table).unwrap();
        parse("mouse(left, 4).wheel(down, 1)", &table).unwrap();
        parse("set(mode, 1).ifeq(mode, 1, k(a))", &table).unwrap();
    }

    #[test]
    fn plus_syntax_expands_to_nested_modifiers() {
        assert_eq!(
            handle_plus_syntax("a + b + c").unwrap(),
            "m(a,m(b,m(c,h())))"
        );
        assert!(handle_plus_syntax("a + ").is_err());
        assert!(handle_plus_syntax("a + k(b)").is_err());

        let macro_ = parse("a + b", &symbols()).unwrap();
        let caps = macro_.capabilities();
        assert!(caps.keys.contains(&evdev::Key::KEY_A.code()));
        assert!(caps.keys.contains(&evdev::Key::KEY_B.code()));
    }

    #[test]
    fn whitespace_and_quotes_are_ignored() {
        let table = symbols();
        parse("k( \"a\" ) . w( 10 )", &table).unwrap();
    }

    #[test]
    fn reports_unknown_functions() {
        let err = parse("nope(3)", &symbols()).unwrap_err();
        assert!(err.to_string().contains("unknown function"));
    }

    #[test]
    fn reports_wrong_arity() {
        let err = parse("k(a, b)", &symbols()).unwrap_err();
        assert!(err.to_string().contains("parameters"));
        let err = parse("r(2)", &symbols()).unwrap_err();
        assert!(err.to_string().contains("parameters"));
    }

    #[test]
    fn reports_unknown_symbols() {
        let err = parse("k(key_does_not_exist)", &symbols()).unwrap_err();
        assert!(err.to_string().contains("unknown key"));
    }

    #[test]
    fn reports_unbalanced_brackets() {
        assert!(parse("k(a", &symbols()).is_err());
        assert!(parse("r(2, k(a)", &symbols()).is_err());
    }

    #[test]
    fn rejects_non_macro_params_where_macros_are_needed() {
        assert!(parse("r(2, 5)", &symbols()).is_err());
        assert!(parse("m(KEY_LEFTCTRL, a)", &symbols()).is_err());
        assert!(parse("ifeq(x, 1, 5)", &symbols()).is_err());
    }

    #[test]
    fn resolves_axis_constants() {
        assert_eq!(rel_axis_code("REL_X"), Some(0));
        assert_eq!(rel_axis_code("REL_WHEEL"), Some(8));
        assert_eq!(abs_axis_code("ABS_X"), Some(0));
        assert_eq!(rel_axis_code("REL_NOPE"), None);
    }
}
