//! Timed sequences of output events.
//!
//! A macro is the compiled form of a small script like
//! `r(3, k(a).w(10))` or `m(KEY_LEFTCTRL, k(c))`. Compilation happens once at
//! handler-graph assembly ([`parse`]); execution is cooperative: every wait
//! and keystroke pause is an await point, and releasing the trigger key cuts
//! in-flight waits short.
//!
//! The grammar lives in [`parse`]; this module owns the runtime: the task
//! tree, the hold/release lifecycle, the capability union used to provision
//! outputs, and the shared variable store that `set`/`ifeq` operate on.

mod parse;

pub use parse::{is_macro, parse};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use log::{debug, error};
use tokio::sync::Notify;
use tokio::time::sleep;

use crate::event::ev;
use crate::outputs::Capabilities;

/// Writer the macro sends its events to: `(type, code, value)`.
pub type MacroWriter = dyn Fn(u16, u16, i32);

/// A value stored in the shared variable store.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The key/value store shared by all macros of one injector.
///
/// Lives as long as the injector process. Writes are last-write-wins on the
/// single-threaded loop; `ifeq` reads a snapshot.
pub type MacroVariables = Rc<RefCell<HashMap<String, Value>>>;

/// One step of a compiled macro.
#[derive(Debug)]
pub(crate) enum Task {
    /// Press and release a key, with keystroke pauses.
    Key { code: u16 },
    /// Write an arbitrary event, followed by a keystroke pause.
    Event { ev_type: u16, code: u16, value: i32 },
    /// Wait, abortable by trigger release.
    Wait { ms: u64 },
    /// Block until the trigger is released.
    HoldBlock,
    /// Hold one key pressed while the trigger is held.
    HoldKey { code: u16 },
    /// Hold several keys pressed while the trigger is held.
    HoldKeys { codes: Vec<u16> },
    /// Repeat a child macro for as long as the trigger is held.
    HoldRepeat { child: Rc<Macro> },
    /// Press a modifier, run a child, release the modifier.
    Modify { code: u16, child: Rc<Macro> },
    /// Run a child a fixed number of times.
    Repeat { count: u32, child: Rc<Macro> },
    /// Store a value in the shared variable store.
    Set { var: String, value: Value },
    /// Branch on a snapshot read of the shared store.
    IfEq {
        var: String,
        value: Value,
        then: Option<Rc<Macro>>,
        otherwise: Option<Rc<Macro>>,
    },
}

/// Whether the surrounding task list should keep executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// A wait was cut short by the trigger release; drop the rest.
    Abort,
}

/// A compiled macro, ready to run any number of times.
pub struct Macro {
    /// Original source for log messages; child macros have none.
    code: Option<String>,
    tasks: Vec<Task>,
    children: Vec<Rc<Macro>>,

    held: Cell<bool>,
    released: Notify,
    running: Cell<bool>,

    /// Own capabilities plus those of all children.
    capabilities: Capabilities,

    /// Pause between keystrokes; shared across the whole macro tree.
    keystroke_sleep_ms: Rc<Cell<u64>>,
    /// Shared variable store; replaced by the context's store at wiring time.
    variables: RefCell<MacroVariables>,
}

impl std::fmt::Debug for Macro {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Macro")
            .field("code", &self.code)
            .field("tasks", &self.tasks.len())
            .field("holding", &self.held.get())
            .finish()
    }
}

impl Macro {
    pub(crate) fn new(
        code: Option<String>,
        tasks: Vec<Task>,
        children: Vec<Rc<Macro>>,
        capabilities: Capabilities,
        keystroke_sleep_ms: Rc<Cell<u64>>,
    ) -> Self {
        Self {
            code,
            tasks,
            children,
            held: Cell::new(false),
            released: Notify::new(),
            running: Cell::new(false),
            capabilities,
            keystroke_sleep_ms,
            variables: RefCell::new(Rc::new(RefCell::new(HashMap::new()))),
        }
    }

    /// The source this macro was compiled from.
    pub fn source(&self) -> &str {
        self.code.as_deref().unwrap_or("")
    }

    /// All capabilities the macro (and its children) may write.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Whether the macro is waiting for its trigger to be released.
    pub fn is_holding(&self) -> bool {
        self.held.get()
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Adjust the inter-keystroke pause for the whole macro tree.
    pub fn set_keystroke_sleep(&self, ms: u64) {
        self.keystroke_sleep_ms.set(ms);
    }

    /// Replace the variable store of the whole tree with a shared one.
    pub fn bind_variables(&self, store: &MacroVariables) {
        *self.variables.borrow_mut() = Rc::clone(store);
        for child in &self.children {
            child.bind_variables(store);
        }
    }

    /// The trigger key went down.
    pub fn press_trigger(&self) {
        if self.held.get() {
            error!("macro \"{}\" is already holding", self.source());
            return;
        }
        self.held.set(true);
        for child in &self.children {
            child.press_trigger();
        }
    }

    /// The trigger key was released; wakes any in-flight wait or hold.
    pub fn release_trigger(&self) {
        self.held.set(false);
        self.released.notify_waiters();
        for child in &self.children {
            child.release_trigger();
        }
    }

    /// Run the task list sequentially.
    ///
    /// A second concurrent run is refused. A wait cut short by the trigger
    /// release aborts the remaining tasks, like the surrounding handler
    /// machinery expects.
    pub async fn run(&self, writer: &MacroWriter) {
        if self.running.get() {
            error!("tried to run already running macro \"{}\"", self.source());
            return;
        }
        self.running.set(true);
        self.run_tasks(writer).await;
        self.running.set(false);
    }

    fn run_tasks<'a>(&'a self, writer: &'a MacroWriter) -> LocalBoxFuture<'a, Flow> {
        async move {
            for task in &self.tasks {
                if self.run_task(task, writer).await == Flow::Abort {
                    return Flow::Abort;
                }
            }
            Flow::Continue
        }
        .boxed_local()
    }

    async fn run_task(&self, task: &Task, writer: &MacroWriter) -> Flow {
        match task {
            Task::Key { code } => {
                writer(ev::EV_KEY, *code, 1);
                self.keystroke_pause().await;
                writer(ev::EV_KEY, *code, 0);
                self.keystroke_pause().await;
            }
            Task::Event {
                ev_type,
                code,
                value,
            } => {
                writer(*ev_type, *code, *value);
                self.keystroke_pause().await;
            }
            Task::Wait { ms } => {
                if self.interruptible_wait(*ms).await == Flow::Abort {
                    return Flow::Abort;
                }
            }
            Task::HoldBlock => self.block_until_released().await,
            Task::HoldKey { code } => {
                writer(ev::EV_KEY, *code, 1);
                self.block_until_released().await;
                writer(ev::EV_KEY, *code, 0);
            }
            Task::HoldKeys { codes } => {
                for code in codes {
                    writer(ev::EV_KEY, *code, 1);
                    self.keystroke_pause().await;
                }
                self.block_until_released().await;
                for code in codes.iter().rev() {
                    writer(ev::EV_KEY, *code, 0);
                    self.keystroke_pause().await;
                }
            }
            Task::HoldRepeat { child } => {
                // run the child to completion each round so its releases are
                // never skipped
                while self.held.get() {
                    child.run_tasks(writer).await;
                }
            }
            Task::Modify { code, child } => {
                writer(ev::EV_KEY, *code, 1);
                self.keystroke_pause().await;
                child.run_tasks(writer).await;
                self.keystroke_pause().await;
                writer(ev::EV_KEY, *code, 0);
                self.keystroke_pause().await;
            }
            Task::Repeat { count, child } => {
                for _ in 0..*count {
                    child.run_tasks(writer).await;
                }
            }
            Task::Set { var, value } => {
                debug!("\"{var}\" set to \"{value}\"");
                self.variables
                    .borrow()
                    .borrow_mut()
                    .insert(var.clone(), value.clone());
            }
            Task::IfEq {
                var,
                value,
                then,
                otherwise,
            } => {
                let current = self.variables.borrow().borrow().get(var).cloned();
                let branch = if current.as_ref() == Some(value) {
                    then
                } else {
                    otherwise
                };
                if let Some(child) = branch {
                    child.run_tasks(writer).await;
                }
            }
        }
        Flow::Continue
    }

    /// Wait in 10 ms slices so a release can cut the wait short.
    async fn interruptible_wait(&self, ms: u64) -> Flow {
        for _ in 0..ms / 10 {
            sleep(Duration::from_millis(10)).await;
            if !self.held.get() {
                return Flow::Abort;
            }
        }
        if ms % 10 > 0 {
            sleep(Duration::from_millis(ms % 10)).await;
            if !self.held.get() {
                return Flow::Abort;
            }
        }
        Flow::Continue
    }

    async fn block_until_released(&self) {
        while self.held.get() {
            self.released.notified().await;
        }
    }

    async fn keystroke_pause(&self) {
        let ms = self.keystroke_sleep_ms.get();
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolTable;
    use std::time::Duration;
    use tokio::task::LocalSet;

    fn recorded() -> (Rc<RefCell<Vec<(u16, u16, i32)>>>, Rc<impl Fn(u16, u16, i32)>) {
        let events: Rc<RefCell<Vec<(u16, u16, i32)>>> = Rc::default();
        let sink = Rc::clone(&events);
        let writer = Rc::new(move |t, c, v| sink.borrow_mut().push((t, c, v)));
        (events, writer)
    }

    async fn run_to_end(macro_: &Macro, writer: &MacroWriter) {
        macro_.press_trigger();
        // nothing here holds, so the run ends on its own
        macro_.run(writer).await;
        macro_.release_trigger();
    }

    #[tokio::test(start_paused = true)]
    async fn keycode_presses_and_releases() {
        let symbols = SymbolTable::capture();
        let macro_ = parse("k(a).k(b)", &symbols).unwrap();
        let (events, writer) = recorded();

        LocalSet::new()
            .run_until(run_to_end(&macro_, writer.as_ref()))
            .await;

        let a = evdev::Key::KEY_A.code();
        let b = evdev::Key::KEY_B.code();
        assert_eq!(
            events.borrow().as_slice(),
            &[
                (ev::EV_KEY, a, 1),
                (ev::EV_KEY, a, 0),
                (ev::EV_KEY, b, 1),
                (ev::EV_KEY, b, 0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_runs_the_child_n_times() {
        let symbols = SymbolTable::capture();
        let macro_ = parse("r(3, k(a))", &symbols).unwrap();
        let (events, writer) = recorded();

        LocalSet::new()
            .run_until(run_to_end(&macro_, writer.as_ref()))
            .await;

        assert_eq!(events.borrow().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn release_cuts_a_wait_short_and_aborts() {
        let symbols = SymbolTable::capture();
        let macro_ = Rc::new(parse("k(a).w(10000).k(b)", &symbols).unwrap());
        let (events, writer) = recorded();

        let local = LocalSet::new();
        local
            .run_until(async {
                macro_.press_trigger();
                let runner = {
                    let macro_ = Rc::clone(&macro_);
                    let writer = Rc::clone(&writer);
                    tokio::task::spawn_local(
                        async move { macro_.run(writer.as_ref()).await },
                    )
                };
                tokio::time::sleep(Duration::from_millis(100)).await;
                macro_.release_trigger();
                runner.await.unwrap();
            })
            .await;

        // k(a) ran, the wait aborted, k(b) never happened
        assert_eq!(events.borrow().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hold_keys_holds_until_release() {
        let symbols = SymbolTable::capture();
        let macro_ = Rc::new(parse("hold_keys(BTN_LEFT, BTN_RIGHT)", &symbols).unwrap());
        let (events, writer) = recorded();
        let left = evdev::Key::BTN_LEFT.code();
        let right = evdev::Key::BTN_RIGHT.code();

        let local = LocalSet::new();
        local
            .run_until(async {
                macro_.press_trigger();
                let runner = {
                    let macro_ = Rc::clone(&macro_);
                    let writer = Rc::clone(&writer);
                    tokio::task::spawn_local(
                        async move { macro_.run(writer.as_ref()).await },
                    )
                };
                tokio::time::sleep(Duration::from_millis(50)).await;
                assert_eq!(
                    events.borrow().as_slice(),
                    &[(ev::EV_KEY, left, 1), (ev::EV_KEY, right, 1)]
                );

                macro_.release_trigger();
                runner.await.unwrap();
            })
            .await;

        assert_eq!(events.borrow().len(), 4);
        assert_eq!(events.borrow()[2..], [(ev::EV_KEY, right, 0), (ev::EV_KEY, left, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn variables_are_shared_between_macros() {
        let symbols = SymbolTable::capture();
        let setter = parse("set(mode, 1)", &symbols).unwrap();
        let checker = parse("ifeq(mode, 1, k(a), k(b))", &symbols).unwrap();

        let store: MacroVariables = Rc::new(RefCell::new(HashMap::new()));
        setter.bind_variables(&store);
        checker.bind_variables(&store);

        let (events, writer) = recorded();
        LocalSet::new()
            .run_until(async {
                run_to_end(&setter, writer.as_ref()).await;
                run_to_end(&checker, writer.as_ref()).await;
            })
            .await;

        let a = evdev::Key::KEY_A.code();
        assert_eq!(
            events.borrow().as_slice(),
            &[(ev::EV_KEY, a, 1), (ev::EV_KEY, a, 0)]
        );
    }

    #[test]
    fn capabilities_union_includes_children() {
        let symbols = SymbolTable::capture();
        let macro_ = parse("m(KEY_LEFTCTRL, k(a)).e(EV_REL, REL_X, 10)", &symbols).unwrap();
        let caps = macro_.capabilities();
        assert!(caps.keys.contains(&evdev::Key::KEY_LEFTCTRL.code()));
        assert!(caps.keys.contains(&evdev::Key::KEY_A.code()));
        assert!(caps.rel.contains(&evdev::RelativeAxisType::REL_X.0));
        // mouse recognition baseline for relative output
        assert!(caps.rel.contains(&evdev::RelativeAxisType::REL_WHEEL.0));
    }
}
