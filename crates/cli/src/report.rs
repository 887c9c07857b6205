//! Terminal output for a running job.

use std::io::Write;
use std::sync::Arc;

use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{Clear, ClearType};

use gcode_stream_core::command::{Command, CommandKind};
use gcode_stream_core::command_stream::CommandStream;
use gcode_stream_core::display::{StatusListener, TimingBand};
use gcode_stream_core::error::Result;
use gcode_stream_core::job::JobStatus;

/// Color used for the timing of a finished command.
pub fn timing_color(band: TimingBand) -> Color {
    match band {
        TimingBand::Fast => Color::Green,
        TimingBand::Normal => Color::DarkGreen,
        TimingBand::Slow => Color::Yellow,
        TimingBand::VerySlow => Color::DarkYellow,
        TimingBand::Stalled => Color::Red,
    }
}

/// One line describing a parsed command, as printed by `--show`.
///
/// ```
/// use gcode_stream_core::parser::parse_line;
/// use gcode_stream_cli::report::format_command;
///
/// let command = parse_line("G1 X10 F1500 ; move", 7);
/// assert_eq!(format_command(&command), "7\tG1\tX=10 F=1500\t; move");
/// ```
pub fn format_command(command: &Command) -> String {
    let code = match command.kind {
        CommandKind::G | CommandKind::M => command.code().unwrap_or_default(),
        CommandKind::None => "-".to_string(),
        CommandKind::Invalid => format!("invalid `{}`", command.raw.trim()),
    };

    let params = command
        .params
        .iter()
        .map(|param| {
            if param.valid {
                format!("{}={}", param.name, param.value)
            } else {
                format!("{}?", param.raw)
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    let mut line = format!("{}\t{}\t{}", command.line_index, code, params);
    if let Some(comment) = &command.comment {
        line.push_str("\t; ");
        line.push_str(comment);
    }
    line
}

/// Writes job progress to a terminal.
///
/// The current status is kept on a single line that is redrawn in place. When
/// the job moves past a line, the timing of the finished command is printed
/// above it, colored by [`TimingBand`].
pub struct StatusReporter<W: Write> {
    out: W,
    stream: Arc<CommandStream>,
    listener: StatusListener,
    current_line: i64,
}

impl<W: Write> StatusReporter<W> {
    pub fn new(out: W, stream: Arc<CommandStream>) -> Self {
        Self {
            out,
            stream,
            listener: StatusListener::new(),
            current_line: -1,
        }
    }

    /// Renders `status` if anything visible changed since the last call.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the terminal fails.
    pub fn report(&mut self, status: &JobStatus) -> Result<()> {
        let change = self.listener.observe(status);
        if !change.any() {
            return Ok(());
        }

        if status.executing_line_idx != self.current_line {
            self.finish_line()?;
            self.current_line = status.executing_line_idx;
        }

        queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(status.to_string())
        )?;
        self.out.flush()?;
        Ok(())
    }

    /// Prints the timing of the last command and ends the status line.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the terminal fails.
    pub fn finish(&mut self) -> Result<()> {
        self.finish_line()?;
        self.current_line = -1;
        queue!(self.out, Print("\n"))?;
        self.out.flush()?;
        Ok(())
    }

    fn finish_line(&mut self) -> Result<()> {
        let Ok(line) = u64::try_from(self.current_line) else {
            return Ok(());
        };
        let Some(command) = self.stream.try_get_cached(line) else {
            return Ok(());
        };
        let execute_time_ms = command.execute_time_ms();
        if execute_time_ms <= 0 {
            return Ok(());
        }

        let band = TimingBand::of(execute_time_ms);
        queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(format!("{:>8} {:<24} ", line, command.raw.trim())),
            SetForegroundColor(timing_color(band)),
            Print(format!("{execute_time_ms} ms ({})", band.label())),
            ResetColor,
            Print("\n")
        )?;
        Ok(())
    }

    /// Gives back the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}
