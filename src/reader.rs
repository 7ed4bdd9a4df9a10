//! Per-source read loop: grab, dispatch, forward.
//!
//! One [`EventReader`] serves one grabbed event node. Events are dispatched
//! to the handler list registered for their `(type, code)`; the first
//! handler that claims wins, the remaining ones are notified with
//! `suppress = true` so their state stays truthful. Whatever nobody claims
//! is written verbatim to the source's forward output.
//!
//! Wheel events never produce a kernel release, so a claimed wheel event
//! arms a debounced synthetic release; without it, combinations and macros
//! triggered by wheel motion would stay held forever.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::combination::InputCombination;
use crate::context::{EventSource, SharedContext};
use crate::error::Result;
use crate::event::{ev, EventActions, InputEvent};
use crate::group::{classify, DeviceType};
use crate::handlers::{HandlerGraph, NotifyArgs};
use crate::outputs::{Capabilities, ForwardOutput};

/// Grab attempts per path; a previously grabbed device needs a moment to
/// become available again.
const GRAB_ATTEMPTS: u32 = 4;
const GRAB_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Debounce window of the synthetic wheel release: three ticks at 60 Hz.
const WHEEL_RELEASE_DELAY: Duration = Duration::from_micros(3 * 1_000_000 / 60);

/// Whether any member of any mapped combination can come out of `caps`.
pub fn is_in_capabilities(combination: &InputCombination, caps: &Capabilities) -> bool {
    combination
        .iter()
        .any(|event| caps.supports(event.ev_type, event.code))
}

/// Open and exclusively grab a source path, if the preset needs it.
///
/// Returns `None` when no mapping could ever trigger from this device; such
/// paths are skipped entirely, which also spares the events-per-second cost
/// of reading them.
pub async fn grab_source(path: &Path, context: &SharedContext) -> Result<Option<evdev::Device>> {
    let mut device = evdev::Device::open(path)?;
    let caps = Capabilities::from_device(&device);

    let mut needed = context
        .preset
        .iter()
        .any(|(combination, _)| is_in_capabilities(combination, &caps));

    if !needed && classify(&caps) == DeviceType::Gamepad && context.preset.maps_joystick() {
        debug!("grabbing {} because the preset maps a joystick", path.display());
        needed = true;
    }

    if !needed {
        debug!("no need to grab {}", path.display());
        return Ok(None);
    }

    let mut attempts = 0;
    loop {
        match device.grab() {
            Ok(()) => {
                debug!("grabbed {}", path.display());
                return Ok(Some(device));
            }
            Err(error) => {
                attempts += 1;
                debug!("failed attempt {attempts} to grab {}", path.display());
                if attempts >= GRAB_ATTEMPTS {
                    error!("cannot grab {}, it is possibly in use: {error}", path.display());
                    return Ok(None);
                }
            }
        }
        sleep(GRAB_RETRY_DELAY).await;
    }
}

/// Reads one source and routes its events into the handler graph.
pub struct EventReader {
    source: Rc<EventSource>,
    forward: ForwardOutput,
    graph: Rc<HandlerGraph>,
    context: SharedContext,
    /// Generation counter per `(type, code)` for the wheel debounce.
    debounces: Rc<RefCell<HashMap<(u16, u16), u64>>>,
}

impl EventReader {
    /// Wire a reader for an already-grabbed source. The forward output is
    /// registered in the context under the source path.
    pub fn new(
        source: EventSource,
        forward: ForwardOutput,
        graph: Rc<HandlerGraph>,
        context: SharedContext,
    ) -> Rc<Self> {
        context.set_forward_output(&source.path, forward.clone());
        Rc::new(Self {
            source: Rc::new(source),
            forward,
            graph,
            context,
            debounces: Rc::new(RefCell::new(HashMap::new())),
        })
    }

    pub fn source(&self) -> &Rc<EventSource> {
        &self.source
    }

    /// Dispatch one event: handlers first, forward as the fallback.
    pub fn handle(&self, event: InputEvent) {
        self.context.listeners.borrow_mut().emit(&event);

        if event.ev_type == ev::EV_KEY && event.value == 2 {
            // the output uinput generates its own repeats for mapped keys;
            // feeding repeats into the graph would toggle combinations
            if self.graph.handlers_for(event.type_and_code()).is_none() {
                self.forward.write(event.ev_type, event.code, event.value);
            }
            return;
        }

        if dispatch(&self.graph, &self.source, &self.forward, &event) {
            if event.is_wheel_event() || event.is_wheel_hi_res_event() {
                self.schedule_wheel_release(event);
            }
            return;
        }

        self.forward.write(event.ev_type, event.code, event.value);
    }

    /// Arm (or re-arm) the synthetic release of a wheel-as-key trigger.
    fn schedule_wheel_release(&self, event: InputEvent) {
        let type_and_code = event.type_and_code();
        let generation = {
            let mut debounces = self.debounces.borrow_mut();
            let entry = debounces.entry(type_and_code).or_insert(0);
            *entry += 1;
            *entry
        };

        let debounces = Rc::clone(&self.debounces);
        let graph = Rc::clone(&self.graph);
        let source = Rc::clone(&self.source);
        let forward = self.forward.clone();
        tokio::task::spawn_local(async move {
            sleep(WHEEL_RELEASE_DELAY).await;
            let still_armed = debounces.borrow().get(&type_and_code) == Some(&generation);
            if still_armed {
                let release = event.with_value(0).with_actions(EventActions::AS_KEY);
                dispatch(&graph, &source, &forward, &release);
            }
        });
    }

    /// Run until the device goes away or shutdown is signalled.
    ///
    /// The grab is released and the handlers are left to the injector's
    /// reset pass; a reader exiting early (unplugged device) only takes
    /// itself down.
    pub async fn run(
        self: Rc<Self>,
        device: evdev::Device,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("reading \"{}\" at {}", self.source.name, self.source.path);
        let mut stream = match device.into_event_stream() {
            Ok(stream) => stream,
            Err(e) => {
                error!("no event stream for {}: {e}", self.source.path);
                return;
            }
        };

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = stream.next_event() => match next {
                    Ok(raw) => {
                        if raw.event_type() == evdev::EventType::SYNCHRONIZATION {
                            continue;
                        }
                        self.handle(InputEvent::from_raw(raw));
                    }
                    Err(e) => {
                        // device disappeared; other readers keep running
                        error!("reader for {} stopped early: {e}", self.source.path);
                        return;
                    }
                }
            }
        }

        if let Err(e) = stream.device_mut().ungrab() {
            error!("failed to release the grab on {}: {e}", self.source.path);
        }
        debug!("reader for {} shut down", self.source.path);
    }
}

/// Run the handler list for an event. Returns whether anyone claimed it.
///
/// The first claim wins; everyone after it is still notified with
/// `suppress = true` so combination state stays truthful.
fn dispatch(
    graph: &HandlerGraph,
    source: &Rc<EventSource>,
    forward: &ForwardOutput,
    event: &InputEvent,
) -> bool {
    let Some(handlers) = graph.handlers_for(event.type_and_code()) else {
        return false;
    };

    let args = NotifyArgs::new(source, forward);
    let mut claimed = false;
    for handler in handlers {
        if !claimed {
            claimed = handler.borrow_mut().notify(event, &args);
        } else {
            handler.borrow_mut().notify(event, &args.suppressed());
        }
    }
    claimed
}
