use std::fmt::{Display, Formatter};

use crate::display::progress_bar;

/// Executing line index while no line is executing.
pub const NO_LINE: i64 = -1;

/// State of the job controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Shutdown,
    SelfTest,
    Idle,
    /// Started, waiting for the source index.
    Waiting,
    Printing,
    Pause,
    PrintFailed,
    Canceled,
}

impl CommandState {
    /// Whether a job is in flight in this state.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            CommandState::Waiting | CommandState::Printing | CommandState::Pause
        )
    }
}

impl Display for CommandState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandState::Shutdown => "Shutdown",
            CommandState::SelfTest => "SelfTest",
            CommandState::Idle => "Idle",
            CommandState::Waiting => "Waiting",
            CommandState::Printing => "Printing",
            CommandState::Pause => "Pause",
            CommandState::PrintFailed => "PrintFailed",
            CommandState::Canceled => "Canceled",
        };
        formatter.write_str(name)
    }
}

/// Request from a caller to the execution loop, consumed at its checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSignal {
    #[default]
    None,
    Pause,
    Continue,
    Stop,
}

/// Snapshot of the job, published by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub command_state: CommandState,
    /// Line being executed, [`NO_LINE`] when none.
    pub executing_line_idx: i64,
    pub total_lines: u64,
    /// Progress of the executing line in `[0, 1]`.
    pub executing_progress: f32,
    /// Time taken by the last finished command.
    pub execute_time_ms: i64,
}

impl JobStatus {
    /// Moves to another line; its progress starts over.
    pub fn set_executing_line_idx(&mut self, line_idx: i64) {
        self.executing_line_idx = line_idx;
        self.executing_progress = 0.0;
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.executing_progress = progress.clamp(0.0, 1.0);
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            command_state: CommandState::Shutdown,
            executing_line_idx: NO_LINE,
            total_lines: 0,
            executing_progress: 0.0,
            execute_time_ms: 0,
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{:<11} line ", self.command_state.to_string())?;
        if self.executing_line_idx == NO_LINE {
            write!(formatter, "-")?;
        } else {
            write!(formatter, "{}", self.executing_line_idx + 1)?;
        }
        write!(
            formatter,
            "/{} [{}] {} ms",
            self.total_lines,
            progress_bar(self.executing_progress, 0, '#', '-'),
            self.execute_time_ms
        )
    }
}
