//! End-to-end pipeline scenarios: events in at the reader, events out at the
//! recording sinks standing in for the uinput devices.

use std::rc::Rc;
use std::time::Duration;

use rebind::combination::InputCombination;
use rebind::context::{Context, EventSource, SharedContext};
use rebind::event::{ev, InputEvent};
use rebind::handlers::build_handler_graph;
use rebind::mapping::Mapping;
use rebind::outputs::{AbsRange, Capabilities, ForwardOutput, OutputKind, RecordingSink, VirtualOutputs};
use rebind::preset::Preset;
use rebind::reader::EventReader;
use rebind::symbols::SymbolTable;
use tokio::task::LocalSet;

const KEY: u16 = ev::EV_KEY;
const REL: u16 = ev::EV_REL;
const ABS: u16 = ev::EV_ABS;

/// A reader wired to recording outputs instead of kernel uinputs.
struct Pipeline {
    reader: Rc<EventReader>,
    keyboard: RecordingSink,
    mouse: RecordingSink,
    forward: RecordingSink,
    #[allow(dead_code)]
    context: SharedContext,
}

impl Pipeline {
    fn new(preset: Preset, source_caps: Capabilities) -> Self {
        let keyboard = RecordingSink::new();
        let mouse = RecordingSink::new();
        let mut outputs = VirtualOutputs::new();
        outputs.register(
            "keyboard",
            OutputKind::Keyboard.template(),
            Box::new(keyboard.clone()),
        );
        outputs.register("mouse", OutputKind::Mouse.template(), Box::new(mouse.clone()));

        let context = Context::new(preset, SymbolTable::capture(), Rc::new(outputs));
        let graph = Rc::new(build_handler_graph(&context));

        let forward = RecordingSink::new();
        let forward_output = ForwardOutput::from_sink("source", Box::new(forward.clone()));
        let source = EventSource {
            path: "/dev/input/event0".into(),
            name: "test device".into(),
            capabilities: source_caps,
            is_gamepad: false,
        };
        let reader = EventReader::new(source, forward_output, graph, Rc::clone(&context));

        Self {
            reader,
            keyboard,
            mouse,
            forward,
            context,
        }
    }

    fn feed(&self, ev_type: u16, code: u16, value: i32) {
        self.reader.handle(InputEvent::new(ev_type, code, value));
    }
}

fn keyboard_caps() -> Capabilities {
    let mut caps = Capabilities::default();
    caps.keys.extend(1..=248u16);
    caps
}

fn code_of(symbol: &str) -> u16 {
    SymbolTable::capture().get(symbol).unwrap()
}

#[test]
fn single_key_remap() {
    let mut preset = Preset::new("single");
    preset.add(Mapping::key_output(
        InputCombination::parse("1,30,1").unwrap(),
        "keyboard",
        "KEY_B",
    ));
    let pipeline = Pipeline::new(preset, keyboard_caps());
    let b = code_of("KEY_B");

    pipeline.feed(KEY, 30, 1);
    pipeline.feed(KEY, 30, 0);

    assert_eq!(pipeline.keyboard.events(), vec![(KEY, b, 1), (KEY, b, 0)]);
    assert!(pipeline.forward.events().is_empty());
}

#[test]
fn two_key_combination_suppresses_member_leakage() {
    let mut preset = Preset::new("chord");
    preset.add(Mapping::key_output(
        InputCombination::parse("1,29,1+1,30,1").unwrap(),
        "keyboard",
        "KEY_Z",
    ));
    let pipeline = Pipeline::new(preset, keyboard_caps());
    let z = code_of("KEY_Z");

    pipeline.feed(KEY, 29, 1); // member press, not yet a chord: forwarded
    pipeline.feed(KEY, 30, 1); // chord completes
    pipeline.feed(KEY, 30, 0);
    pipeline.feed(KEY, 29, 0);

    assert_eq!(pipeline.keyboard.events(), vec![(KEY, z, 1), (KEY, z, 0)]);

    // before activation only the 29-press leaked; at activation both members
    // were released on the forward device
    assert_eq!(
        pipeline.forward.events(),
        vec![
            (KEY, 29, 1),
            (KEY, 29, 0),
            (KEY, 30, 0),
            (KEY, 29, 0), // the real release falls through after deactivation
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn absolute_axis_to_relative_motion() {
    let mut preset = Preset::new("joystick-mouse");
    let mut mapping = Mapping::code_output(
        InputCombination::parse("3,0,0").unwrap(),
        "mouse",
        REL,
        0, // REL_X
    );
    mapping.rel_speed = 100.0;
    mapping.rel_rate = 60;
    mapping.gain = 1.0;
    mapping.deadzone = 0.1;
    preset.add(mapping);

    let mut caps = Capabilities::default();
    caps.abs.insert(0, AbsRange::new(-32768, 32767));
    let pipeline = Pipeline::new(preset, caps);

    LocalSet::new()
        .run_until(async {
            pipeline.feed(ABS, 0, 32767);
            tokio::time::sleep(Duration::from_millis(100)).await;

            let events = pipeline.mouse.events();
            assert!(events.len() >= 5, "expected >= 5 ticks, got {}", events.len());
            assert!(events.iter().all(|(t, c, v)| (*t, *c) == (REL, 0) && *v > 0));
            let moved: i32 = events.iter().map(|(_, _, v)| v).sum();
            assert!((8..=12).contains(&moved), "moved {moved}, expected ~10");

            // releasing to 0 stops the loop within one tick
            pipeline.feed(ABS, 0, 0);
            tokio::time::sleep(Duration::from_millis(17)).await;
            let settled = pipeline.mouse.events().len();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(pipeline.mouse.events().len(), settled);
        })
        .await;
}

#[test]
fn hat_axis_to_button_via_negative_trigger() {
    let mut preset = Preset::new("hat");
    preset.add(Mapping::key_output(
        InputCombination::parse("3,16,-10").unwrap(), // ABS_HAT0X at -10%
        "keyboard",
        "KEY_LEFT",
    ));

    let mut caps = Capabilities::default();
    caps.abs.insert(16, AbsRange::new(-1, 1));
    let pipeline = Pipeline::new(preset, caps);
    let left = code_of("KEY_LEFT");

    pipeline.feed(ABS, 16, -1);
    assert_eq!(pipeline.keyboard.events(), vec![(KEY, left, 1)]);

    pipeline.feed(ABS, 16, 0);
    assert_eq!(pipeline.keyboard.events(), vec![(KEY, left, 1), (KEY, left, 0)]);

    pipeline.feed(ABS, 16, 1);
    assert_eq!(pipeline.keyboard.events().len(), 2, "positive value must not emit");
}

#[tokio::test(start_paused = true)]
async fn macro_with_hold_presses_and_releases_both_buttons() {
    let mut preset = Preset::new("hold-macro");
    preset.add(Mapping::key_output(
        InputCombination::parse("1,58,1").unwrap(),
        "mouse",
        "hold_keys(BTN_LEFT, BTN_RIGHT)",
    ));
    let pipeline = Pipeline::new(preset, keyboard_caps());
    let left = code_of("BTN_LEFT");
    let right = code_of("BTN_RIGHT");

    LocalSet::new()
        .run_until(async {
            pipeline.feed(KEY, 58, 1);
            tokio::time::sleep(Duration::from_millis(50)).await;
            let pressed = pipeline.mouse.events();
            assert!(pressed.contains(&(KEY, left, 1)));
            assert!(pressed.contains(&(KEY, right, 1)));

            pipeline.feed(KEY, 58, 0);
            tokio::time::sleep(Duration::from_millis(100)).await;
            let events = pipeline.mouse.events();
            assert!(events.contains(&(KEY, left, 0)));
            assert!(events.contains(&(KEY, right, 0)));
        })
        .await;
}

#[test]
fn hierarchy_gives_the_chord_priority() {
    // (A,) -> X and (B, A) -> Y share the last key A
    let mut preset = Preset::new("hierarchy");
    preset.add(Mapping::key_output(
        InputCombination::parse("1,30,1").unwrap(),
        "keyboard",
        "KEY_X",
    ));
    preset.add(Mapping::key_output(
        InputCombination::parse("1,48,1+1,30,1").unwrap(),
        "keyboard",
        "KEY_Y",
    ));
    let pipeline = Pipeline::new(preset, keyboard_caps());
    let x = code_of("KEY_X");
    let y = code_of("KEY_Y");

    // press B, press A: the chord wins, X stays silent
    pipeline.feed(KEY, 48, 1);
    pipeline.feed(KEY, 30, 1);
    assert_eq!(pipeline.keyboard.events(), vec![(KEY, y, 1)]);

    pipeline.feed(KEY, 30, 0);
    pipeline.feed(KEY, 48, 0);
    assert_eq!(pipeline.keyboard.events(), vec![(KEY, y, 1), (KEY, y, 0)]);

    // A alone now triggers the plain mapping
    pipeline.feed(KEY, 30, 1);
    assert_eq!(
        pipeline.keyboard.events(),
        vec![(KEY, y, 1), (KEY, y, 0), (KEY, x, 1)]
    );
    pipeline.feed(KEY, 30, 0);
}

#[test]
fn reloaded_preset_builds_an_equivalent_graph() {
    let mut preset = Preset::new("roundtrip");
    preset.add(Mapping::key_output(
        InputCombination::parse("1,29,1+1,30,1").unwrap(),
        "keyboard",
        "KEY_Z",
    ));
    let mut axis = Mapping::code_output(
        InputCombination::parse("3,0,0").unwrap(),
        "mouse",
        REL,
        0,
    );
    axis.deadzone = 0.25;
    preset.add(axis);

    let reloaded: Preset =
        serde_json::from_str(&serde_json::to_string(&preset).unwrap()).unwrap();

    let graph_for = |preset: Preset| {
        let mut outputs = VirtualOutputs::new();
        for name in ["keyboard", "mouse"] {
            outputs.register(
                name,
                OutputKind::from_name(name).unwrap().template(),
                Box::new(RecordingSink::new()),
            );
        }
        let context = Context::new(preset, SymbolTable::capture(), Rc::new(outputs));
        build_handler_graph(&context)
    };

    let original = graph_for(preset);
    let rebuilt = graph_for(reloaded);

    let mut original_codes: Vec<(u16, u16)> = original.codes().copied().collect();
    let mut rebuilt_codes: Vec<(u16, u16)> = rebuilt.codes().copied().collect();
    original_codes.sort_unstable();
    rebuilt_codes.sort_unstable();
    assert_eq!(original_codes, rebuilt_codes);

    for code in original_codes {
        let labels = |graph: &rebind::handlers::HandlerGraph| -> Vec<String> {
            graph
                .handlers_for(code)
                .unwrap()
                .iter()
                .map(|h| h.borrow().label())
                .collect()
        };
        assert_eq!(labels(&original), labels(&rebuilt), "graph differs at {code:?}");
    }
}
