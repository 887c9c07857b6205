//! Text rendering of job progress and command timing.

use crate::job::JobStatus;

const BAR_CELLS: i64 = 10;
/// Most decimals `progress_bar` will show.
pub const MAX_PROGRESS_DIGITS: u32 = 6;

/// Renders a progress value in `[0, 1]` as a ten-cell bar.
///
/// Every completed tenth is a `complete` cell. The part of the current tenth,
/// in percent with `digits` decimals, is written inline as one cell, and the
/// remaining cells are `incomplete`. Values outside `[0, 1]` are clamped and
/// `digits` is capped at [`MAX_PROGRESS_DIGITS`].
///
/// # Examples
///
/// ```
/// use gcode_stream_core::display::progress_bar;
///
/// assert_eq!(progress_bar(0.54321, 0, '#', '-'), "#####4----");
/// assert_eq!(progress_bar(0.54321, 1, '#', '-'), "#####43----");
/// assert_eq!(progress_bar(1.0, 0, '#', '-'), "##########");
/// ```
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn progress_bar(progress: f32, digits: u32, complete: char, incomplete: char) -> String {
    let progress = progress.clamp(0.0, 1.0);
    let digits = digits.min(MAX_PROGRESS_DIGITS);
    let scale = 10_i64.pow(digits);
    let interval = 10 * scale;
    // One value drives every cell, so the bar always has ten of them.
    let scaled = (progress * 100.0 * scale as f32) as i64;

    let full = (scaled / interval).min(BAR_CELLS);
    let partial = scaled - full * interval;
    let empty = BAR_CELLS - full - i64::from(partial != 0);

    let mut bar = String::with_capacity(BAR_CELLS as usize + digits as usize + 2);
    bar.extend(std::iter::repeat(complete).take(full as usize));
    if partial != 0 {
        bar.push_str(&partial.to_string());
    }
    bar.extend(std::iter::repeat(incomplete).take(empty.max(0) as usize));
    bar
}

/// How long a command took, by band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimingBand {
    /// Under 125 ms.
    Fast,
    /// Under 250 ms.
    Normal,
    /// Under 500 ms.
    Slow,
    /// Under 1 s.
    VerySlow,
    Stalled,
}

impl TimingBand {
    pub fn of(execute_time_ms: i64) -> Self {
        if execute_time_ms < 125 {
            TimingBand::Fast
        } else if execute_time_ms < 250 {
            TimingBand::Normal
        } else if execute_time_ms < 500 {
            TimingBand::Slow
        } else if execute_time_ms < 1000 {
            TimingBand::VerySlow
        } else {
            TimingBand::Stalled
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimingBand::Fast => "fast",
            TimingBand::Normal => "normal",
            TimingBand::Slow => "slow",
            TimingBand::VerySlow => "very slow",
            TimingBand::Stalled => "stalled",
        }
    }
}

/// What changed between two observed statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusChange {
    pub state: bool,
    /// The executing line or its progress changed.
    pub progress: bool,
}

impl StatusChange {
    pub fn any(self) -> bool {
        self.state || self.progress
    }
}

/// Remembers the last status seen and reports what changed since.
#[derive(Debug, Default)]
pub struct StatusListener {
    previous: Option<JobStatus>,
}

impl StatusListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `status`; the first observation reports everything as changed.
    pub fn observe(&mut self, status: &JobStatus) -> StatusChange {
        let change = match &self.previous {
            None => StatusChange {
                state: true,
                progress: true,
            },
            Some(previous) => StatusChange {
                state: previous.command_state != status.command_state,
                progress: previous.executing_line_idx != status.executing_line_idx
                    || (previous.executing_progress - status.executing_progress).abs()
                        > f32::EPSILON,
            },
        };
        self.previous = Some(status.clone());
        change
    }
}
