use std::time::{Duration, Instant};

use log::debug;
use rand::Rng;
use tokio::sync::watch;

use crate::cancel::{CancelToken, Cancelled};
use crate::command::{Command, CommandKind};
use crate::job::JobStatus;

/// Base progress per tick of a `G` command, scaled by a factor in `[1, 5)`.
const G_STEP: f32 = 0.015;
/// Base progress per tick of an `M` command, scaled by a factor in `[1, 5)`.
const M_STEP: f32 = 0.01;

/// A stopwatch that can be paused; paused time is not counted.
#[derive(Debug, Default)]
pub struct Stopwatch {
    running_since: Option<Instant>,
    accumulated: Duration,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    pub fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated
            + self
                .running_since
                .map_or(Duration::ZERO, |since| since.elapsed())
    }
}

/// Progress gained by one tick of a command of the given kind.
pub fn progress_step<R: Rng>(kind: CommandKind, rng: &mut R) -> f32 {
    let base = match kind {
        CommandKind::G => G_STEP,
        CommandKind::M => M_STEP,
        CommandKind::None | CommandKind::Invalid => return 1.0,
    };
    base * rng.gen_range(1.0..5.0)
}

/// Runs one command to completion, publishing its progress on every tick.
///
/// The command is simulated: progress goes from 0 to 1 in randomized steps,
/// one step per `tick`.
///
/// # Errors
///
/// Returns [`Cancelled`] as soon as `cancel` fires.
pub async fn execute_command<R: Rng + Send>(
    command: &Command,
    status: &watch::Sender<JobStatus>,
    rng: &mut R,
    tick: Duration,
    cancel: &CancelToken,
) -> Result<(), Cancelled> {
    debug!("Executing line {}: {}", command.line_index, command);
    let mut progress = 0.0;
    while progress < 1.0 {
        cancel.sleep(tick).await?;
        progress = (progress + progress_step(command.kind, rng)).min(1.0);
        status.send_modify(|status| status.set_progress(progress));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_progress_steps_are_bounded() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let step = progress_step(CommandKind::G, &mut rng);
            assert!((0.015..=0.075).contains(&step));
            let step = progress_step(CommandKind::M, &mut rng);
            assert!((0.01..=0.05).contains(&step));
        }
        assert!((progress_step(CommandKind::None, &mut rng) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_stopwatch_excludes_paused_time() {
        let mut stopwatch = Stopwatch::started();
        std::thread::sleep(Duration::from_millis(5));
        stopwatch.pause();
        let paused_at = stopwatch.elapsed();
        assert!(!stopwatch.is_running());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(stopwatch.elapsed(), paused_at);

        stopwatch.start();
        assert!(stopwatch.elapsed() >= paused_at);
    }

    #[tokio::test]
    async fn test_execute_command_reaches_full_progress() {
        let (status, receiver) = watch::channel(JobStatus::default());
        let mut rng = StdRng::seed_from_u64(1);
        let command = parse_line("G1 X10", 0);

        execute_command(&command, &status, &mut rng, Duration::ZERO, &CancelToken::new())
            .await
            .unwrap();
        assert!((receiver.borrow().executing_progress - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_execute_command_stops_on_cancel() {
        let (status, receiver) = watch::channel(JobStatus::default());
        let mut rng = StdRng::seed_from_u64(1);
        let command = parse_line("M104 S200", 0);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = execute_command(
            &command,
            &status,
            &mut rng,
            Duration::from_millis(10),
            &cancel,
        )
        .await;
        assert_eq!(result, Err(Cancelled));
        assert!(receiver.borrow().executing_progress < 1.0);
    }
}
