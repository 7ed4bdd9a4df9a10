#![cfg(target_os = "linux")]
#![cfg_attr(docsrs, feature(doc_cfg))]
//! `rebind`: a modular input-event remapper for Linux evdev devices.
//!
//! Rebind grabs input devices, routes every event through a per-`(type, code)`
//! graph of mapping handlers assembled from a declarative preset, and emits the
//! transformed events on `uinput` virtual devices. Events that no handler
//! claims are forwarded verbatim on a per-device "forward" output, so a
//! half-mapped keyboard keeps behaving like a keyboard.
//!
//! # Quick start
//! ```no_run
//! use rebind::prelude::*;
//!
//! let preset = Preset::load("preset.json").expect("load preset");
//! let groups = rebind::group::discover().expect("scan /dev/input");
//! let group = groups.into_iter().next().expect("no input devices");
//!
//! // Runs until a Close command arrives on the channel.
//! let (_cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
//! let (msg_tx, _msg_rx) = tokio::sync::mpsc::unbounded_channel();
//! Injector::new(group, preset).run_blocking(cmd_rx, msg_tx).unwrap();
//! ```
//!
//! # Modules
//! - [`event`] — the event value type and its action tags
//! - [`combination`] — ordered multi-event trigger chords
//! - [`transform`] — deadzone/expo/gain axis shaping
//! - [`symbols`] — key-name → key-code snapshot
//! - [`mapping`] / [`preset`] — the declarative rule surface
//! - [`outputs`] — named virtual output devices and their capabilities
//! - [`macros`] — the macro language (`k(a).w(100).k(b)` and friends)
//! - [`handlers`] — the event-handler graph and its builder
//! - [`reader`] — per-device read/dispatch/forward loop
//! - [`injector`] — per-device-group lifecycle and control channel
//! - [`supervisor`] — process-boundary handle for the injector
//!
//! ## Threading
//! One injector serves one device group and runs everything — readers, macro
//! tasks, release timers, recenter loops — on a single-threaded cooperative
//! runtime. Injectors for different groups live in separate processes and
//! share no memory; the supervisor talks to them over a message channel.

pub mod combination;
pub mod context;
pub mod event;
pub mod group;
pub mod handlers;
pub mod injector;
pub mod macros;
pub mod mapping;
pub mod numlock;
pub mod outputs;
pub mod preset;
pub mod reader;
pub mod supervisor;
pub mod symbols;
pub mod transform;

/// Error and Result types for the crate.
pub mod error {
    //! Error and result types used across rebind.
    //!
    //! Preset-assembly problems (unknown symbols, broken macros, invalid
    //! shaping parameters) surface at load time through these types. At
    //! runtime most paths recover locally and log instead; only
    //! lifecycle-level failures travel on the injector's control channel.

    /// Crate-wide error type.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        /// A handler addressed a virtual output that was never created.
        #[error("virtual output \"{0}\" is not available")]
        UinputNotAvailable(String),

        /// The virtual output exists but lacks the capability for this event.
        #[error("output \"{target}\" cannot handle event ({ev_type}, {code})")]
        EventNotHandled {
            target: String,
            ev_type: u16,
            code: u16,
        },

        /// A key name that the system symbol snapshot does not know.
        #[error("unknown symbol \"{0}\"")]
        UnknownSymbol(String),

        /// The macro source could not be compiled.
        #[error("failed to parse macro \"{source_code}\": {reason}")]
        MacroParse { source_code: String, reason: String },

        /// A combination string like `"1,30,1+1,29,1"` did not parse.
        #[error("invalid combination \"{0}\"")]
        InvalidCombination(String),

        /// A mapping failed validation (bad output, shaping out of range, ...).
        #[error("invalid mapping: {0}")]
        InvalidMapping(String),

        /// No source device of the group could be grabbed.
        #[error("could not grab any device of group \"{0}\"")]
        NoGrab(String),

        /// Underlying device or uinput IO failure.
        #[error(transparent)]
        Io(#[from] std::io::Error),

        /// Opaque failure surfaced as a message.
        #[error("{0}")]
        Other(String),
    }

    /// Convenient crate-wide result alias.
    pub type Result<T> = core::result::Result<T, Error>;
}

pub use error::{Error, Result};
pub use injector::Injector;

// ---- Re-exports (convenience) ----
pub use combination::InputCombination;
pub use event::{EventActions, InputEvent};
pub use group::DeviceGroup;
pub use mapping::Mapping;
pub use preset::Preset;

// A tiny prelude for downstreams.
pub mod prelude {
    pub use crate::combination::InputCombination;
    pub use crate::event::{EventActions, InputEvent};
    pub use crate::group::{DeviceGroup, DeviceType};
    pub use crate::injector::{Injector, InjectorCommand, InjectorMessage, InjectorState};
    pub use crate::mapping::Mapping;
    pub use crate::outputs::VirtualOutputs;
    pub use crate::preset::Preset;
    pub use crate::symbols::SymbolTable;
    pub use crate::transform::Transformation;
}
