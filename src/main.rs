//! The `rebind` command line.

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};

use rebind::injector::{Injector, InjectorState};
use rebind::preset::Preset;
use rebind::supervisor::{InjectorProcess, WorkerPayload};

/// Remap input events of Linux devices before the rest of the system sees
/// them.
///
/// Needs read access to the source devices under `/dev/input` and write
/// access to `/dev/uinput`.
#[derive(Debug, Parser)]
#[command(name = "rebind", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// List the device groups that can be injected.
    List,
    /// Inject a preset for one device group until interrupted.
    Run {
        /// Group key as printed by `rebind list`.
        group: String,
        /// Path to the preset file (`.json` or `.toml`).
        preset: PathBuf,
    },
    /// Internal: the injector process behind `run`.
    #[command(hide = true)]
    Worker,
}

fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = match Cli::parse().command {
        Cmd::List => list(),
        Cmd::Run { group, preset } => run(&group, &preset),
        Cmd::Worker => worker(),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn list() -> rebind::Result<()> {
    for group in rebind::group::discover()? {
        println!("{}  {:?}", group.key, group.types);
        for path in &group.paths {
            println!("    {}", path.display());
        }
    }
    Ok(())
}

fn run(group_key: &str, preset_path: &std::path::Path) -> rebind::Result<()> {
    let preset = Preset::load(preset_path)?;
    let group = rebind::group::discover()?
        .into_iter()
        .find(|g| g.key == group_key)
        .ok_or_else(|| rebind::Error::Other(format!("no device group \"{group_key}\"")))?;

    let mut process = InjectorProcess::spawn(group, preset)?;

    // report state transitions until the injector settles or dies; ctrl-c
    // reaches the child as stdin EOF and shuts it down cleanly
    let mut last = InjectorState::Unknown;
    loop {
        let state = process.get_state();
        if state != last {
            info!("{}: {state}", process.group_key());
            last = state;
        }
        match state {
            InjectorState::NoGrab | InjectorState::Failed | InjectorState::Stopped => {
                return match state {
                    InjectorState::Stopped => Ok(()),
                    other => Err(rebind::Error::Other(format!("injector ended in {other}"))),
                };
            }
            _ => std::thread::sleep(Duration::from_millis(500)),
        }
    }
}

/// The injector process: payload on the first stdin line, then command
/// frames; message frames go to stdout.
fn worker() -> rebind::Result<()> {
    let payload_line = {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        lines
            .next()
            .ok_or_else(|| rebind::Error::Other("missing worker payload".into()))??
    };
    let payload: WorkerPayload = serde_json::from_str(&payload_line)
        .map_err(|e| rebind::Error::Other(format!("unreadable worker payload: {e}")))?;

    let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
    let (msg_tx, mut msg_rx) = tokio::sync::mpsc::unbounded_channel();

    // stdin → command channel; EOF (supervisor died) counts as Close
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let lines = stdin.lock().lines();
        for line in lines {
            let Ok(line) = line else { break };
            match serde_json::from_str(&line) {
                Ok(command) => {
                    if cmd_tx.send(command).is_err() {
                        return;
                    }
                }
                Err(e) => error!("unreadable command \"{line}\": {e}"),
            }
        }
        // dropping cmd_tx closes the channel, which the injector treats
        // as a close request
    });

    // message channel → stdout
    std::thread::spawn(move || {
        while let Some(message) = msg_rx.blocking_recv() {
            match serde_json::to_string(&message) {
                Ok(frame) => println!("{frame}"),
                Err(e) => error!("failed to serialize {message:?}: {e}"),
            }
        }
    });

    Injector::new(payload.group, payload.preset).run_blocking(cmd_rx, msg_tx)
}
