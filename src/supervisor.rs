//! Supervisor-side handle of an injector process.
//!
//! Grabbing has side effects (numlock toggling, kernel bookkeeping) and a
//! rare crash must never contaminate other devices, so every injector runs
//! in its own process: the same executable re-invoked with the hidden
//! `worker` subcommand. The control channel is JSON frames, one per line,
//! over the child's stdin/stdout; stderr stays wired to the parent for
//! logs.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::group::DeviceGroup;
use crate::injector::{InjectorCommand, InjectorMessage, InjectorState};
use crate::preset::Preset;

/// First frame on the worker's stdin: everything it needs to start.
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub group: DeviceGroup,
    pub preset: Preset,
}

/// A spawned injector process and the state machine observing it.
pub struct InjectorProcess {
    group_key: String,
    child: Child,
    stdin: ChildStdin,
    messages: mpsc::Receiver<InjectorMessage>,
    state: InjectorState,
}

impl InjectorProcess {
    /// Spawn the injector for a group with a preset.
    pub fn spawn(group: DeviceGroup, preset: Preset) -> Result<Self> {
        let exe = std::env::current_exe()?;
        let mut child = Command::new(exe)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let group_key = group.key.clone();

        let payload = WorkerPayload { group, preset };
        let frame = serde_json::to_string(&payload)
            .map_err(|e| Error::Other(format!("failed to serialize worker payload: {e}")))?;
        writeln!(stdin, "{frame}")?;

        // drain stdout frames on a thread; get_state polls the channel
        let (tx, messages) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                match serde_json::from_str::<InjectorMessage>(&line) {
                    Ok(message) => {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => error!("unreadable injector message \"{line}\": {e}"),
                }
            }
        });

        Ok(Self {
            group_key,
            child,
            stdin,
            messages,
            state: InjectorState::Unknown,
        })
    }

    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    /// The current lifecycle state, derived from process liveness and the
    /// latest channel message.
    pub fn get_state(&mut self) -> InjectorState {
        let alive = matches!(self.child.try_wait(), Ok(None));

        if self.state == InjectorState::Unknown && !alive {
            return self.state;
        }
        if self.state == InjectorState::Unknown && alive {
            self.state = InjectorState::Starting;
        }

        if self.state == InjectorState::Starting {
            while let Ok(message) = self.messages.try_recv() {
                match message {
                    InjectorMessage::Ok => self.state = InjectorState::Running,
                    InjectorMessage::NoGrab => self.state = InjectorState::NoGrab,
                }
            }
        }

        if matches!(self.state, InjectorState::Starting | InjectorState::Running) && !alive {
            error!("injector for \"{}\" was unexpectedly found dead", self.group_key);
            self.state = InjectorState::Failed;
        }

        self.state
    }

    /// Ask the injector to tear down and exit.
    pub fn stop(&mut self) {
        info!("stopping injection for group \"{}\"", self.group_key);
        if let Ok(frame) = serde_json::to_string(&InjectorCommand::Close) {
            let _ = writeln!(self.stdin, "{frame}");
        }
        let _ = self.child.wait();
        self.state = InjectorState::Stopped;
    }
}

impl Drop for InjectorProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            debug!("killing injector for \"{}\"", self.group_key);
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_payload_round_trips() {
        let payload = WorkerPayload {
            group: DeviceGroup {
                key: "kbd".into(),
                name: "Test Keyboard".into(),
                paths: vec!["/dev/input/event3".into()],
                types: vec![crate::group::DeviceType::Keyboard],
            },
            preset: Preset::new("test"),
        };
        let frame = serde_json::to_string(&payload).unwrap();
        let back: WorkerPayload = serde_json::from_str(&frame).unwrap();
        assert_eq!(back.group.key, "kbd");
        assert_eq!(back.preset.name, "test");
    }

    #[test]
    fn command_frames_are_single_lines() {
        let frame = serde_json::to_string(&InjectorCommand::Close).unwrap();
        assert!(!frame.contains('\n'));
        let back: InjectorCommand = serde_json::from_str(&frame).unwrap();
        assert_eq!(back, InjectorCommand::Close);
    }
}
