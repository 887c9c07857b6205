//! Parsed G-code commands.
//!
//! A [`Command`] is produced by [`crate::parser::parse_line`] for one line of
//! a file and shared as `Arc<Command>` between the parse cache, the read-ahead
//! buffer and the job loop. It never changes after parsing, except for the
//! measured execution time written back by the job loop.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicI64, Ordering};

/// What a line turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// A `G` (motion) command.
    G,
    /// An `M` (machine) command.
    M,
    /// A blank or comment-only line.
    None,
    /// A line that does not start with a known command letter or has a bad number.
    Invalid,
}

impl CommandKind {
    /// Whether commands of this kind are queued for execution.
    pub fn is_executable(self) -> bool {
        matches!(self, CommandKind::G | CommandKind::M)
    }
}

impl Display for CommandKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::G => formatter.write_str("G"),
            CommandKind::M => formatter.write_str("M"),
            CommandKind::None => formatter.write_str("None"),
            CommandKind::Invalid => formatter.write_str("Invalid"),
        }
    }
}

/// A single word after the command code, e.g. `X10.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: char,
    /// Parsed value, `0.0` when the word has no value or it is not a number.
    pub value: f64,
    /// The word as written.
    pub raw: String,
    /// False when the name is not an ASCII letter or the value is not a number.
    pub valid: bool,
}

#[derive(Debug)]
pub struct Command {
    pub kind: CommandKind,
    /// Command number; 0 and meaningless unless `kind` is `G` or `M`.
    pub number: u32,
    pub params: Vec<Parameter>,
    pub comment: Option<String>,
    pub raw: String,
    pub line_index: u64,
    execute_time_ms: AtomicI64,
}

impl Command {
    pub fn new(
        kind: CommandKind,
        number: u32,
        params: Vec<Parameter>,
        comment: Option<String>,
        raw: String,
        line_index: u64,
    ) -> Self {
        Self {
            kind,
            number,
            params,
            comment,
            raw,
            line_index,
            execute_time_ms: AtomicI64::new(0),
        }
    }

    /// The command code such as `G1`, if the line holds a command.
    pub fn code(&self) -> Option<String> {
        self.kind
            .is_executable()
            .then(|| format!("{}{}", self.kind, self.number))
    }

    /// Looks up the first parameter with the given name, ignoring case.
    pub fn param(&self, name: char) -> Option<&Parameter> {
        self.params
            .iter()
            .find(|param| param.name.eq_ignore_ascii_case(&name))
    }

    pub fn has_invalid_params(&self) -> bool {
        self.params.iter().any(|param| !param.valid)
    }

    /// Milliseconds this command took in the last job that ran it, 0 if never run.
    pub fn execute_time_ms(&self) -> i64 {
        self.execute_time_ms.load(Ordering::Relaxed)
    }

    pub fn set_execute_time_ms(&self, execute_time_ms: i64) {
        self.execute_time_ms
            .store(execute_time_ms, Ordering::Relaxed);
    }
}

impl Display for Command {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.raw)
    }
}
