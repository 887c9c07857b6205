//! Interactive job control from standard input.

use std::fmt::{Display, Formatter};
use std::io::{stdin, BufRead};
use std::str::FromStr;
use std::thread;

use log::{debug, warn};
use tokio::sync::mpsc;

use gcode_stream_core::error::Result;
use gcode_stream_core::job::JobController;

pub const HELP: &str = "Controls: [p]ause, [c]ontinue, [s]top, cancel with [x] or Ctrl-C, [?] help";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Continue,
    Stop,
    Cancel,
    Help,
}

impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "p" | "pause" => Ok(ControlCommand::Pause),
            "c" | "continue" | "resume" => Ok(ControlCommand::Continue),
            "s" | "stop" => Ok(ControlCommand::Stop),
            "x" | "cancel" => Ok(ControlCommand::Cancel),
            "?" | "h" | "help" => Ok(ControlCommand::Help),
            other => Err(format!("Unknown control `{other}`. {HELP}")),
        }
    }
}

impl Display for ControlCommand {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ControlCommand::Pause => "pause",
            ControlCommand::Continue => "continue",
            ControlCommand::Stop => "stop",
            ControlCommand::Cancel => "cancel",
            ControlCommand::Help => "help",
        };
        formatter.write_str(name)
    }
}

impl ControlCommand {
    /// Sends this request to the controller.
    ///
    /// # Errors
    ///
    /// Returns the controller's error when the request is not valid in its
    /// current state.
    pub fn apply(self, controller: &JobController) -> Result<()> {
        match self {
            ControlCommand::Pause => controller.pause(),
            ControlCommand::Continue => controller.resume(),
            ControlCommand::Stop => controller.stop(),
            ControlCommand::Cancel => controller.cancel(),
            ControlCommand::Help => Ok(()),
        }
    }
}

/// Reads control commands from stdin on a dedicated thread.
///
/// Blank lines are ignored and unknown input is answered on stderr. The thread
/// ends at end of input or when the receiver is dropped.
pub fn spawn_stdin_reader() -> mpsc::Receiver<ControlCommand> {
    let (sender, receiver) = mpsc::channel(8);
    let spawned = thread::Builder::new()
        .name("gcode-controls".to_string())
        .spawn(move || {
            for line in stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ControlCommand>() {
                    Ok(command) => {
                        if sender.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    Err(message) => eprintln!("\n{message}"),
                }
            }
            debug!("Control input closed");
        });
    if let Err(e) = spawned {
        warn!("Interactive controls unavailable: {}", e);
    }
    receiver
}
