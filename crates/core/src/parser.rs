//! Parsing of a single G-code line.
//!
//! A line is scanned once, front to back:
//!
//! 1. Leading spaces are skipped. `G`/`M` (either case) start a command, `;`
//!    starts a comment and anything else makes the line [`CommandKind::Invalid`].
//! 2. The digits up to the next space or `;` are the command number.
//! 3. The words up to `;` are the parameters, split on spaces.
//! 4. Everything after `;` is the comment, trimmed.
//!
//! Parsing never fails: problems are reported through the kind of the
//! returned [`Command`] and the validity flag of each [`Parameter`].

use log::debug;

use crate::command::{Command, CommandKind, Parameter};

const COMMENT_START: char = ';';
const WORD_SEPARATOR: char = ' ';

/// Parses one raw line into a [`Command`].
///
/// # Examples
///
/// ```
/// use gcode_stream_core::command::CommandKind;
/// use gcode_stream_core::parser::parse_line;
///
/// let command = parse_line("G1 X10 Y-2.5 ; go", 12);
/// assert_eq!(command.kind, CommandKind::G);
/// assert_eq!(command.number, 1);
/// assert_eq!(command.params.len(), 2);
/// assert_eq!(command.comment.as_deref(), Some("go"));
/// assert_eq!(command.line_index, 12);
/// ```
pub fn parse_line(raw: &str, line_index: u64) -> Command {
    let line = raw.trim_start_matches(WORD_SEPARATOR);

    let mut chars = line.chars();
    let kind = match chars.next() {
        None => return blank(raw, line_index, None),
        Some(COMMENT_START) => {
            return blank(raw, line_index, Some(chars.as_str().trim().to_string()));
        }
        Some('G' | 'g') => CommandKind::G,
        Some('M' | 'm') => CommandKind::M,
        Some(other) => {
            debug!("Line {}: unknown command letter `{}`", line_index, other);
            return invalid(raw, line_index);
        }
    };

    let body = chars.as_str();
    let number_end = body
        .find([WORD_SEPARATOR, COMMENT_START])
        .unwrap_or(body.len());
    let Some(number) = parse_number(&body[..number_end]) else {
        debug!("Line {}: bad command number in `{}`", line_index, raw);
        return invalid(raw, line_index);
    };

    let rest = &body[number_end..];
    let (words, comment) = match rest.split_once(COMMENT_START) {
        Some((words, comment)) => (words, Some(comment.trim().to_string())),
        None => (rest, None),
    };
    let params = words
        .split(WORD_SEPARATOR)
        .filter(|word| !word.is_empty())
        .map(parse_parameter)
        .collect();

    Command::new(kind, number, params, comment, raw.to_string(), line_index)
}

fn blank(raw: &str, line_index: u64, comment: Option<String>) -> Command {
    Command::new(
        CommandKind::None,
        0,
        Vec::new(),
        comment,
        raw.to_string(),
        line_index,
    )
}

fn invalid(raw: &str, line_index: u64) -> Command {
    Command::new(
        CommandKind::Invalid,
        0,
        Vec::new(),
        None,
        raw.to_string(),
        line_index,
    )
}

fn parse_number(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parses a non-empty word such as `X10.5`. A bare letter has value 0.
fn parse_parameter(word: &str) -> Parameter {
    let mut chars = word.chars();
    let name = chars.next().unwrap_or(WORD_SEPARATOR);
    let value_text = chars.as_str();

    let value = if value_text.is_empty() {
        Some(0.0)
    } else {
        value_text
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
    };

    Parameter {
        name,
        value: value.unwrap_or(0.0),
        raw: word.to_string(),
        valid: name.is_ascii_alphabetic() && value.is_some(),
    }
}
