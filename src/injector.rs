//! Per-device-group injection lifecycle.
//!
//! One injector serves one [`DeviceGroup`]: it snapshots the symbol table,
//! creates the virtual outputs, assembles the handler graph, grabs the
//! group's event nodes and runs one reader per grabbed node — all on a
//! single-threaded cooperative runtime. The supervising process talks to it
//! over a small message channel; everything else (grab retries, dead
//! readers, broken mappings) is handled locally.
//!
//! Injectors run in their own process so that grabbing side effects and
//! crashes never contaminate other devices; see [`crate::supervisor`] for
//! the process boundary.

use std::collections::HashMap;
use std::rc::Rc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::context::{Context, EventSource};
use crate::error::Result;
use crate::event::ev;
use crate::group::{classify, DeviceGroup, DeviceType};
use crate::handlers::build_handler_graph;
use crate::mapping::Mapping;
use crate::numlock;
use crate::outputs::{AbsRange, Capabilities, ForwardOutput, OutputKind, VirtualOutputs};
use crate::preset::Preset;
use crate::reader::{grab_source, EventReader};
use crate::symbols::SymbolTable;

/// Supervisor → injector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectorCommand {
    /// Tear down and exit cleanly.
    Close,
}

/// Injector → supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectorMessage {
    /// Startup complete, readers are running.
    Ok,
    /// No source device could be grabbed; the injector is exiting.
    NoGrab,
}

/// Lifecycle as observed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectorState {
    Unknown,
    Starting,
    Running,
    Stopped,
    Failed,
    NoGrab,
}

impl std::fmt::Display for InjectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InjectorState::Unknown => "UNKNOWN",
            InjectorState::Starting => "STARTING",
            InjectorState::Running => "RUNNING",
            InjectorState::Stopped => "STOPPED",
            InjectorState::Failed => "FAILED",
            InjectorState::NoGrab => "NO_GRAB",
        };
        f.pad(name)
    }
}

/// Keeps injecting events for one device group until told to close.
pub struct Injector {
    group: DeviceGroup,
    preset: Preset,
}

impl Injector {
    pub fn new(group: DeviceGroup, preset: Preset) -> Self {
        Self { group, preset }
    }

    /// Run on a fresh single-threaded runtime until closed.
    ///
    /// This is the whole injector process: readers, macros, timers and the
    /// command listener all share this one loop.
    pub fn run_blocking(
        self,
        commands: mpsc::UnboundedReceiver<InjectorCommand>,
        messages: mpsc::UnboundedSender<InjectorMessage>,
    ) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let local = tokio::task::LocalSet::new();
        local.block_on(&runtime, self.run(commands, messages))
    }

    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<InjectorCommand>,
        messages: mpsc::UnboundedSender<InjectorMessage>,
    ) -> Result<()> {
        info!("starting injection for group \"{}\"", self.group.key);

        let symbols = SymbolTable::capture();
        for (label, e) in self.preset.validate(&symbols) {
            error!("dropping mapping \"{label}\": {e}");
        }

        let mut outputs = VirtualOutputs::new();
        for (name, caps) in
            construct_output_capabilities(&self.preset, &symbols, self.group.is_gamepad())
        {
            outputs.create(&name, caps)?;
        }
        let outputs = Rc::new(outputs);

        let context = Context::new(self.preset, symbols, Rc::clone(&outputs));
        let graph = Rc::new(build_handler_graph(&context));

        // grabbing tends to toggle the numlock; remember it
        let numlock_before = self
            .group
            .paths
            .iter()
            .filter_map(|p| evdev::Device::open(p).ok())
            .find_map(|d| numlock::read_state(&d));

        let mut grabbed = Vec::new();
        for path in &self.group.paths {
            match grab_source(path, &context).await {
                Ok(Some(device)) => grabbed.push((path.clone(), device)),
                Ok(None) => {}
                Err(e) => error!("could not open {}: {e}", path.display()),
            }
        }

        if grabbed.is_empty() {
            error!("did not grab any device of group \"{}\"", self.group.key);
            let _ = messages.send(InjectorMessage::NoGrab);
            return Ok(());
        }

        let numlock_after = numlock::read_group_state(grabbed.iter().map(|(_, d)| d));
        numlock::restore(&outputs, numlock_before, numlock_after);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut readers = FuturesUnordered::new();
        for (path, device) in grabbed {
            let caps = Capabilities::from_device(&device);
            let is_gamepad = classify(&caps) == DeviceType::Gamepad;
            let name = device.name().unwrap_or("unknown").to_string();

            let forward = ForwardOutput::create(&name, &caps)?;
            let source = EventSource {
                path: path.display().to_string(),
                name,
                capabilities: caps,
                is_gamepad,
            };
            let reader = EventReader::new(source, forward, Rc::clone(&graph), Rc::clone(&context));
            readers.push(reader.run(device, shutdown_rx.clone()));
        }

        let _ = messages.send(InjectorMessage::Ok);
        info!("injection for \"{}\" is running", self.group.key);

        let clean = loop {
            tokio::select! {
                command = commands.recv() => {
                    // a dropped channel counts as a close request
                    debug!("received {command:?}");
                    break true;
                }
                _ = readers.next() => {
                    if readers.is_empty() {
                        error!("all readers of \"{}\" exited", self.group.key);
                        break false;
                    }
                }
            }
        };

        // teardown: stop readers, neutralize handlers and outputs
        let _ = shutdown_tx.send(true);
        while readers.next().await.is_some() {}
        graph.reset();
        outputs.reset();

        if clean {
            info!("injection for \"{}\" stopped", self.group.key);
            Ok(())
        } else {
            Err(crate::Error::Other(format!(
                "all readers of \"{}\" exited unexpectedly",
                self.group.key
            )))
        }
    }
}

/// The capability set of every output the preset addresses.
///
/// Starts from the kind's template and adds everything the mappings inject:
/// key outputs, axis outputs, macro capabilities. A gamepad driving
/// relative output additionally needs the mouse baseline or some hosts
/// refuse to move the pointer.
fn construct_output_capabilities(
    preset: &Preset,
    symbols: &SymbolTable,
    group_is_gamepad: bool,
) -> HashMap<String, Capabilities> {
    let mut map: HashMap<String, Capabilities> = HashMap::new();

    for mapping in &preset.mappings {
        let target = &mapping.target_uinput;
        let caps = map.entry(target.clone()).or_insert_with(|| {
            match OutputKind::from_name(target) {
                Some(kind) => kind.template(),
                None => {
                    warn!("unknown output \"{target}\"; creating it without a template");
                    Capabilities::default()
                }
            }
        });

        add_mapping_capabilities(mapping, symbols, group_is_gamepad, caps);
    }

    map
}

fn add_mapping_capabilities(
    mapping: &Mapping,
    symbols: &SymbolTable,
    group_is_gamepad: bool,
    caps: &mut Capabilities,
) {
    if mapping.is_disabled() {
        return;
    }

    if let Some(symbol) = &mapping.output_symbol {
        if crate::macros::is_macro(symbol) {
            if let Ok(macro_) = crate::macros::parse(symbol, symbols) {
                caps.merge(macro_.capabilities());
            }
        } else if let Some(code) = symbols.get(symbol) {
            caps.keys.insert(code);
        }
        return;
    }

    match mapping.output_tuple() {
        Some((ev::EV_KEY, code)) => {
            caps.keys.insert(code);
        }
        Some((ev::EV_ABS, code)) => {
            caps.abs
                .entry(code)
                .or_insert_with(|| AbsRange::new(-32768, 32767));
        }
        Some((ev::EV_REL, code)) => {
            caps.rel.insert(code);
            if group_is_gamepad {
                // REL_X/REL_Y alone are not enough for the host to accept
                // the device as a mouse
                caps.rel.extend([
                    evdev::RelativeAxisType::REL_X.0,
                    evdev::RelativeAxisType::REL_Y.0,
                    evdev::RelativeAxisType::REL_WHEEL.0,
                    evdev::RelativeAxisType::REL_HWHEEL.0,
                ]);
                // BTN_MOUSE
                caps.keys.insert(evdev::Key::BTN_LEFT.code());
            }
        }
        _ => {}
    }
}
