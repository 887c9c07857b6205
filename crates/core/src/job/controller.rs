//! The job controller and its execution loop.
//!
//! State changes:
//!
//! ```text
//! Shutdown -> SelfTest -> Idle <-> Waiting -> Printing <-> Pause
//!                                                  |
//!                                                  v
//!                                   Idle | PrintFailed | Canceled
//! ```
//!
//! Control operations are synchronous and only validate and record a request.
//! The execution loop runs as a tokio task and acts on requests at its
//! checkpoints: after each command, and on every poll while paused.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffer::{CommandBuffer, Fetch};
use crate::cancel::{CancelToken, Cancelled};
use crate::command_stream::CommandStream;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::execution::{execute_command, Stopwatch};
use crate::job::status::{CommandState, ControlSignal, JobStatus, NO_LINE};
use crate::text_stream::IndexState;

#[derive(Debug, Default)]
struct Control {
    buffer: Option<Arc<CommandBuffer>>,
    signal: ControlSignal,
    cancel: Option<CancelToken>,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Shared {
    settings: Settings,
    status: watch::Sender<JobStatus>,
    control: Mutex<Control>,
}

impl Shared {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> CommandState {
        self.status.borrow().command_state
    }

    fn set_state(&self, state: CommandState) {
        self.status.send_modify(|status| status.command_state = state);
    }

    /// Fails unless the current state is one of `allowed`.
    fn require(&self, operation: &'static str, allowed: &[CommandState]) -> Result<()> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            warn!("Rejected {} while {}", operation, state);
            Err(Error::invalid_state(operation, state))
        }
    }

    /// Moves to `to` if the current state is one of `allowed`, atomically.
    fn transition(
        &self,
        operation: &'static str,
        allowed: &[CommandState],
        to: CommandState,
    ) -> Result<()> {
        let mut rejected = None;
        self.status.send_if_modified(|status| {
            if allowed.contains(&status.command_state) {
                status.command_state = to;
                true
            } else {
                rejected = Some(status.command_state);
                false
            }
        });

        match rejected {
            Some(state) => {
                warn!("Rejected {} while {}", operation, state);
                Err(Error::invalid_state(operation, state))
            }
            None => {
                info!("{}: now {}", operation, to);
                Ok(())
            }
        }
    }
}

/// Owns the job state machine and the execution loop.
///
/// All operations take `&self`, so a controller can be shared between the
/// task driving the job and whatever issues control requests.
///
/// # Examples
///
/// ```no_run
/// use gcode_stream_core::command_stream::CommandStream;
/// use gcode_stream_core::config::Settings;
/// use gcode_stream_core::job::{CommandState, JobController};
///
/// # async fn run() -> gcode_stream_core::error::Result<()> {
/// let settings = Settings::default();
/// let controller = JobController::new(&settings);
/// controller.power_on()?;
/// controller.load_stream(CommandStream::open("part.gcode", &settings.stream))?;
/// controller.execute()?;
/// controller.join().await;
/// assert_eq!(controller.status().command_state, CommandState::Idle);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct JobController {
    shared: Arc<Shared>,
}

impl JobController {
    /// Creates a controller in [`CommandState::Shutdown`].
    pub fn new(settings: &Settings) -> Self {
        let (status, _) = watch::channel(JobStatus::default());
        Self {
            shared: Arc::new(Shared {
                settings: settings.clone(),
                status,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> JobStatus {
        self.shared.status.borrow().clone()
    }

    /// Receiver that is notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.shared.status.subscribe()
    }

    /// The buffer of the loaded stream, if any.
    pub fn buffer(&self) -> Option<Arc<CommandBuffer>> {
        self.shared.lock_control().buffer.clone()
    }

    /// Powers on through a self test of the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if not in `Shutdown`, or if the self test fails, in which
    /// case the controller returns to `Shutdown`.
    pub fn power_on(&self) -> Result<()> {
        let _control = self.shared.lock_control();
        self.shared.transition(
            "power on",
            &[CommandState::Shutdown],
            CommandState::SelfTest,
        )?;

        if let Err(e) = self.shared.settings.validate() {
            error!("Self test failed: {}", e);
            self.shared.set_state(CommandState::Shutdown);
            return Err(e);
        }

        self.shared.set_state(CommandState::Idle);
        info!("Self test passed, now {}", CommandState::Idle);
        Ok(())
    }

    /// Releases the loaded stream and shuts down.
    ///
    /// # Errors
    ///
    /// Returns an error if not `Idle`.
    pub fn shutdown(&self) -> Result<()> {
        let mut control = self.shared.lock_control();
        self.shared
            .transition("shut down", &[CommandState::Idle], CommandState::Shutdown)?;
        if let Some(buffer) = control.buffer.take() {
            buffer.stop();
        }
        Ok(())
    }

    /// Replaces the job's source with `stream`, closing the one it replaces.
    ///
    /// # Errors
    ///
    /// Returns an error if not `Idle`.
    pub fn load_stream(&self, stream: Arc<CommandStream>) -> Result<()> {
        let mut control = self.shared.lock_control();
        self.shared.require("load a stream", &[CommandState::Idle])?;

        if let Some(previous) = control.buffer.take() {
            previous.stop();
            if let Some(replaced) = previous.source() {
                if !Arc::ptr_eq(replaced, &stream) {
                    replaced.close();
                }
            }
        }
        info!("Loaded `{}`", stream.path());
        let total_lines = stream.total_lines();
        control.buffer = Some(Arc::new(CommandBuffer::new(
            Some(stream),
            self.shared.settings.buffer.clone(),
        )));

        self.shared.status.send_modify(|status| {
            status.total_lines = total_lines;
            status.set_executing_line_idx(NO_LINE);
            status.execute_time_ms = 0;
        });
        Ok(())
    }

    /// Starts executing the loaded stream in a new task.
    ///
    /// A missing stream or a failing index is reported through the
    /// `PrintFailed` state, not here.
    ///
    /// # Errors
    ///
    /// Returns an error if not `Idle`, or if called outside a tokio runtime.
    pub fn execute(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;

        let mut control = self.shared.lock_control();
        self.shared
            .transition("execute", &[CommandState::Idle], CommandState::Waiting)?;

        let cancel = CancelToken::new();
        control.signal = ControlSignal::None;
        control.cancel = Some(cancel.clone());

        let job = ExecutionLoop {
            shared: Arc::clone(&self.shared),
            buffer: control.buffer.clone(),
            cancel,
            rng: StdRng::from_entropy(),
        };
        control.task = Some(runtime.spawn(job.run()));
        Ok(())
    }

    fn signal(
        &self,
        operation: &'static str,
        allowed: &[CommandState],
        signal: ControlSignal,
    ) -> Result<()> {
        let mut control = self.shared.lock_control();
        if control.signal == ControlSignal::Stop {
            warn!("Rejected {}, a stop is pending", operation);
            return Err(Error::StopPending(operation));
        }
        self.shared.require(operation, allowed)?;

        info!("Requested {}", operation);
        control.signal = signal;
        Ok(())
    }

    /// Requests a pause after the current command.
    ///
    /// # Errors
    ///
    /// Returns an error if not `Printing`, or if a stop is pending.
    pub fn pause(&self) -> Result<()> {
        self.signal("pause", &[CommandState::Printing], ControlSignal::Pause)
    }

    /// Requests that a paused job continues.
    ///
    /// # Errors
    ///
    /// Returns an error if not `Pause`, or if a stop is pending.
    pub fn resume(&self) -> Result<()> {
        self.signal("continue", &[CommandState::Pause], ControlSignal::Continue)
    }

    /// Requests that the job ends after the current command, back in `Idle`.
    ///
    /// # Errors
    ///
    /// Returns an error if not `Printing` or `Pause`, or if a stop is already
    /// pending.
    pub fn stop(&self) -> Result<()> {
        self.signal(
            "stop",
            &[CommandState::Printing, CommandState::Pause],
            ControlSignal::Stop,
        )
    }

    /// Cancels the job at its next suspension point; it ends in `Canceled`.
    ///
    /// # Errors
    ///
    /// Returns an error if no job is in flight.
    pub fn cancel(&self) -> Result<()> {
        let control = self.shared.lock_control();
        self.shared.require(
            "cancel",
            &[
                CommandState::Waiting,
                CommandState::Printing,
                CommandState::Pause,
            ],
        )?;

        info!("Requested cancel");
        if let Some(cancel) = &control.cancel {
            cancel.cancel();
        }
        Ok(())
    }

    /// Returns from `PrintFailed` or `Canceled` to `Idle`.
    ///
    /// # Errors
    ///
    /// Returns an error in any other state.
    pub fn reset(&self) -> Result<()> {
        let _control = self.shared.lock_control();
        self.shared.transition(
            "reset",
            &[CommandState::PrintFailed, CommandState::Canceled],
            CommandState::Idle,
        )?;
        self.shared
            .status
            .send_modify(|status| status.set_executing_line_idx(NO_LINE));
        Ok(())
    }

    /// Waits until the task of the last executed job has ended.
    pub async fn join(&self) {
        let task = self.shared.lock_control().task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Job task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        let mut control = self.shared.lock_control();
        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
        }
        if let Some(buffer) = control.buffer.take() {
            buffer.stop();
        }
    }
}

enum Outcome {
    Completed,
    Stopped,
}

enum Interrupt {
    Canceled,
    Failed(String),
}

impl From<Cancelled> for Interrupt {
    fn from(_: Cancelled) -> Self {
        Interrupt::Canceled
    }
}

struct ExecutionLoop {
    shared: Arc<Shared>,
    buffer: Option<Arc<CommandBuffer>>,
    cancel: CancelToken,
    rng: StdRng,
}

impl ExecutionLoop {
    async fn run(mut self) {
        let result = self.print().await;
        if let Some(buffer) = &self.buffer {
            buffer.stop();
        }

        let (state, clear_line) = match result {
            Ok(Outcome::Completed) => {
                info!("Job complete");
                (CommandState::Idle, false)
            }
            Ok(Outcome::Stopped) => {
                info!("Job stopped");
                (CommandState::Idle, true)
            }
            Err(Interrupt::Canceled) => {
                warn!("Job canceled");
                (CommandState::Canceled, false)
            }
            Err(Interrupt::Failed(reason)) => {
                error!("Job failed: {}", reason);
                (CommandState::PrintFailed, false)
            }
        };

        let mut control = self.shared.lock_control();
        control.signal = ControlSignal::None;
        control.cancel = None;
        self.shared.status.send_modify(|status| {
            status.command_state = state;
            if clear_line {
                status.set_executing_line_idx(NO_LINE);
            }
        });
    }

    /// Takes the pending signal, entering or leaving `Pause` as it says.
    fn take_signal(&self) -> ControlSignal {
        let mut control = self.shared.lock_control();
        let signal = mem::take(&mut control.signal);
        match signal {
            ControlSignal::Pause => self.shared.set_state(CommandState::Pause),
            ControlSignal::Continue => self.shared.set_state(CommandState::Printing),
            ControlSignal::None | ControlSignal::Stop => {}
        }
        signal
    }

    fn take_stop(&self) -> bool {
        let mut control = self.shared.lock_control();
        if control.signal == ControlSignal::Stop {
            control.signal = ControlSignal::None;
            true
        } else {
            false
        }
    }

    async fn wait_for_index(&self, source: &CommandStream) -> std::result::Result<(), Interrupt> {
        let poll_interval = self.shared.settings.job.poll_interval();
        loop {
            match source.index_state() {
                IndexState::Built => return Ok(()),
                IndexState::Building => self.cancel.sleep(poll_interval).await?,
                IndexState::Failed => {
                    let reason = source
                        .text_stream()
                        .failure()
                        .map_or_else(|| "index build failed".to_string(), ToString::to_string);
                    return Err(Interrupt::Failed(reason));
                }
                IndexState::Closed => {
                    return Err(Interrupt::Failed(format!(
                        "`{}` was closed",
                        source.path()
                    )));
                }
            }
        }
    }

    /// Blocks while paused. Returns whether the job continues.
    async fn hold(&self) -> std::result::Result<bool, Interrupt> {
        let pause_poll_interval = self.shared.settings.job.pause_poll_interval();
        loop {
            self.cancel.sleep(pause_poll_interval).await?;
            match self.take_signal() {
                ControlSignal::Continue => return Ok(true),
                ControlSignal::Stop => return Ok(false),
                ControlSignal::Pause | ControlSignal::None => {}
            }
        }
    }

    async fn print(&mut self) -> std::result::Result<Outcome, Interrupt> {
        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| Interrupt::Failed("no stream loaded".to_string()))?;
        let source = buffer
            .source()
            .cloned()
            .ok_or_else(|| Interrupt::Failed("no stream loaded".to_string()))?;

        buffer
            .start()
            .map_err(|e| Interrupt::Failed(e.to_string()))?;
        self.wait_for_index(&source).await?;

        let total_lines = source.total_lines();
        self.shared.status.send_modify(|status| {
            status.command_state = CommandState::Printing;
            status.total_lines = total_lines;
            status.set_executing_line_idx(NO_LINE);
            status.execute_time_ms = 0;
        });
        info!("Printing `{}`, {} lines", source.path(), total_lines);

        let job = self.shared.settings.job.clone();
        let mut stopwatch = Stopwatch::started();
        let mut last_finish = Duration::ZERO;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Interrupt::Canceled);
            }

            let command = match buffer.next() {
                Fetch::Ready { command, .. } => command,
                Fetch::Empty { .. } => {
                    if self.take_stop() {
                        return Ok(Outcome::Stopped);
                    }
                    self.cancel.sleep(job.poll_interval()).await?;
                    continue;
                }
                Fetch::Exhausted { reached_end: true } => return Ok(Outcome::Completed),
                Fetch::Exhausted { reached_end: false } => {
                    return Err(Interrupt::Failed(format!(
                        "reading `{}` ended before the end of the file",
                        source.path()
                    )));
                }
            };

            let line_idx = i64::try_from(command.line_index).unwrap_or(i64::MAX);
            self.shared
                .status
                .send_modify(|status| status.set_executing_line_idx(line_idx));
            execute_command(
                &command,
                &self.shared.status,
                &mut self.rng,
                job.tick_interval(),
                &self.cancel,
            )
            .await?;

            let finished_at = stopwatch.elapsed();
            let execute_time_ms =
                i64::try_from((finished_at - last_finish).as_millis()).unwrap_or(i64::MAX);
            last_finish = finished_at;
            command.set_execute_time_ms(execute_time_ms);
            self.shared
                .status
                .send_modify(|status| status.execute_time_ms = execute_time_ms);

            match self.take_signal() {
                ControlSignal::Stop => return Ok(Outcome::Stopped),
                ControlSignal::Pause => {
                    info!("Paused at line {}", command.line_index);
                    stopwatch.pause();
                    let resumed = self.hold().await?;
                    stopwatch.start();
                    if !resumed {
                        return Ok(Outcome::Stopped);
                    }
                    info!("Continuing after line {}", command.line_index);
                }
                ControlSignal::Continue | ControlSignal::None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferSettings, JobSettings, StreamSettings};
    use crate::text_stream::tests::write_temp;
    use crate::text_stream::IndexedTextStream;
    use std::time::Instant;
    use tempfile::NamedTempFile;
    use tokio::time::timeout;

    fn fast_settings(tick_interval_ms: u64) -> Settings {
        Settings {
            stream: StreamSettings {
                chunk_size: 256,
                cache_capacity: 50,
            },
            buffer: BufferSettings {
                capacity: 5,
                read_interval_ms: 0,
                check_source_interval_ms: 1,
            },
            job: JobSettings {
                poll_interval_ms: 1,
                tick_interval_ms,
                pause_poll_interval_ms: 1,
            },
        }
    }

    fn program(lines: usize) -> String {
        (0..lines)
            .map(|i| match i % 4 {
                0 => format!("G1 X{i} Y{i}\n"),
                1 => "; comment\n".to_string(),
                2 => format!("M117 line {i}\n"),
                _ => "\n".to_string(),
            })
            .collect()
    }

    fn ready_controller(
        content: &str,
        tick_interval_ms: u64,
    ) -> (NamedTempFile, JobController, Arc<CommandStream>) {
        let temp_file = write_temp(content.as_bytes());
        let settings = fast_settings(tick_interval_ms);
        let controller = JobController::new(&settings);
        controller.power_on().unwrap();
        let stream = CommandStream::open(temp_file.path().to_str().unwrap(), &settings.stream);
        controller.load_stream(Arc::clone(&stream)).unwrap();
        (temp_file, controller, stream)
    }

    async fn wait_for(controller: &JobController, predicate: impl Fn(&JobStatus) -> bool) {
        let mut receiver = controller.subscribe();
        timeout(Duration::from_secs(10), receiver.wait_for(|status| predicate(status)))
            .await
            .expect("status not reached in time")
            .unwrap();
    }

    fn is_invalid_state(result: Result<()>, expected: CommandState) -> bool {
        matches!(result, Err(Error::InvalidState { state, .. }) if state == expected)
    }

    #[test]
    fn test_power_cycle() {
        let controller = JobController::new(&fast_settings(0));
        assert_eq!(controller.status().command_state, CommandState::Shutdown);
        assert!(is_invalid_state(controller.pause(), CommandState::Shutdown));

        controller.power_on().unwrap();
        assert_eq!(controller.status().command_state, CommandState::Idle);
        assert!(is_invalid_state(controller.power_on(), CommandState::Idle));

        controller.shutdown().unwrap();
        assert_eq!(controller.status().command_state, CommandState::Shutdown);
    }

    #[test]
    fn test_failing_self_test_returns_to_shutdown() {
        let mut settings = fast_settings(0);
        settings.buffer.capacity = 0;
        let controller = JobController::new(&settings);

        assert!(matches!(controller.power_on(), Err(Error::InvalidSettings(_))));
        assert_eq!(controller.status().command_state, CommandState::Shutdown);
    }

    #[test]
    fn test_controls_rejected_while_idle() {
        let controller = JobController::new(&fast_settings(0));
        controller.power_on().unwrap();

        assert!(is_invalid_state(controller.pause(), CommandState::Idle));
        assert!(is_invalid_state(controller.resume(), CommandState::Idle));
        assert!(is_invalid_state(controller.stop(), CommandState::Idle));
        assert!(is_invalid_state(controller.cancel(), CommandState::Idle));
        assert!(is_invalid_state(controller.reset(), CommandState::Idle));
    }

    #[test]
    fn test_execute_needs_runtime() {
        let controller = JobController::new(&fast_settings(0));
        controller.power_on().unwrap();
        assert!(matches!(controller.execute(), Err(Error::Runtime(_))));
        assert_eq!(controller.status().command_state, CommandState::Idle);
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let (_file, controller, stream) = ready_controller(&program(40), 0);
        controller.execute().unwrap();
        assert!(is_invalid_state(controller.execute(), CommandState::Waiting));

        timeout(Duration::from_secs(10), controller.join()).await.unwrap();
        let status = controller.status();
        assert_eq!(status.command_state, CommandState::Idle);
        assert_eq!(status.total_lines, 40);
        assert_eq!(status.executing_line_idx, 38);

        let last = stream.try_get_cached(38).unwrap();
        assert!(last.execute_time_ms() >= 0);
        assert_eq!(controller.buffer().unwrap().read_position(), -1);
    }

    #[tokio::test]
    async fn test_execute_without_stream_fails() {
        let controller = JobController::new(&fast_settings(0));
        controller.power_on().unwrap();
        controller.execute().unwrap();
        controller.join().await;

        assert_eq!(controller.status().command_state, CommandState::PrintFailed);
        assert!(is_invalid_state(controller.execute(), CommandState::PrintFailed));
        controller.reset().unwrap();
        assert_eq!(controller.status().command_state, CommandState::Idle);
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let settings = fast_settings(0);
        let controller = JobController::new(&settings);
        controller.power_on().unwrap();
        controller
            .load_stream(CommandStream::open("/this/path/does/not/exist.gcode", &settings.stream))
            .unwrap();
        controller.execute().unwrap();
        controller.join().await;

        assert_eq!(controller.status().command_state, CommandState::PrintFailed);
        assert!(is_invalid_state(
            controller.load_stream(CommandStream::open("/nope", &settings.stream)),
            CommandState::PrintFailed
        ));
    }

    #[tokio::test]
    async fn test_pause_continue_stop() {
        let (_file, controller, _stream) = ready_controller(&program(400), 20);
        controller.execute().unwrap();
        wait_for(&controller, |status| {
            status.command_state == CommandState::Printing && status.executing_line_idx >= 0
        })
        .await;

        controller.pause().unwrap();
        wait_for(&controller, |status| status.command_state == CommandState::Pause).await;
        assert!(is_invalid_state(controller.pause(), CommandState::Pause));
        let paused_line = controller.status().executing_line_idx;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.status().executing_line_idx, paused_line);

        controller.resume().unwrap();
        wait_for(&controller, |status| status.command_state == CommandState::Printing).await;

        controller.stop().unwrap();
        assert!(matches!(controller.stop(), Err(Error::StopPending(_))));
        assert!(matches!(controller.pause(), Err(Error::StopPending(_))));

        timeout(Duration::from_secs(10), controller.join()).await.unwrap();
        let status = controller.status();
        assert_eq!(status.command_state, CommandState::Idle);
        assert_eq!(status.executing_line_idx, NO_LINE);
        assert!(status.executing_progress.abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_stop_while_paused() {
        let (_file, controller, _stream) = ready_controller(&program(400), 20);
        controller.execute().unwrap();
        wait_for(&controller, |status| status.command_state == CommandState::Printing).await;

        controller.pause().unwrap();
        wait_for(&controller, |status| status.command_state == CommandState::Pause).await;
        controller.stop().unwrap();
        assert!(matches!(controller.resume(), Err(Error::StopPending(_))));

        timeout(Duration::from_secs(10), controller.join()).await.unwrap();
        assert_eq!(controller.status().command_state, CommandState::Idle);
    }

    #[test]
    fn test_reloading_closes_replaced_stream() {
        let (_file, controller, first) = ready_controller(&program(10), 0);
        let second_file = write_temp(b"G1 X1\n");
        let second = CommandStream::open(
            second_file.path().to_str().unwrap(),
            &controller.settings().stream,
        );

        controller.load_stream(Arc::clone(&second)).unwrap();
        assert_eq!(first.index_state(), IndexState::Closed);
        assert_ne!(second.index_state(), IndexState::Closed);

        controller.load_stream(Arc::clone(&second)).unwrap();
        assert_ne!(second.index_state(), IndexState::Closed);
    }

    /// Cancels and checks the job ends `Canceled` well before any poll interval.
    async fn cancel_promptly(controller: &JobController) {
        let started = Instant::now();
        controller.cancel().unwrap();
        timeout(Duration::from_secs(2), controller.join()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(controller.status().command_state, CommandState::Canceled);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_index() {
        let temp_file = write_temp(program(40).as_bytes());
        let mut settings = fast_settings(1);
        settings.job.poll_interval_ms = 1000;
        let controller = JobController::new(&settings);
        controller.power_on().unwrap();

        let text = Arc::new(IndexedTextStream::new(
            temp_file.path().to_str().unwrap(),
            &settings.stream,
        ));
        let stream = Arc::new(CommandStream::from_text_stream(
            text,
            settings.stream.cache_capacity,
        ));
        controller.load_stream(Arc::clone(&stream)).unwrap();
        controller.execute().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.status().command_state, CommandState::Waiting);
        assert_eq!(stream.index_state(), IndexState::Building);

        cancel_promptly(&controller).await;
        assert_eq!(controller.status().executing_line_idx, NO_LINE);
    }

    #[tokio::test]
    async fn test_cancel_while_buffer_is_empty() {
        let temp_file = write_temp(program(40).as_bytes());
        let mut settings = fast_settings(1);
        settings.buffer.read_interval_ms = 5000;
        settings.job.poll_interval_ms = 1000;
        let controller = JobController::new(&settings);
        controller.power_on().unwrap();
        controller
            .load_stream(CommandStream::open(temp_file.path().to_str().unwrap(), &settings.stream))
            .unwrap();
        controller.execute().unwrap();

        wait_for(&controller, |status| {
            status.executing_line_idx == 0 && status.executing_progress >= 1.0
        })
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.status().command_state, CommandState::Printing);
        assert!(controller.buffer().unwrap().is_empty());

        cancel_promptly(&controller).await;
        assert_eq!(controller.status().executing_line_idx, 0);
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let temp_file = write_temp(program(400).as_bytes());
        let mut settings = fast_settings(20);
        settings.job.pause_poll_interval_ms = 1000;
        let controller = JobController::new(&settings);
        controller.power_on().unwrap();
        controller
            .load_stream(CommandStream::open(temp_file.path().to_str().unwrap(), &settings.stream))
            .unwrap();
        controller.execute().unwrap();
        wait_for(&controller, |status| {
            status.command_state == CommandState::Printing && status.executing_line_idx >= 0
        })
        .await;

        controller.pause().unwrap();
        wait_for(&controller, |status| status.command_state == CommandState::Pause).await;
        let paused_line = controller.status().executing_line_idx;

        cancel_promptly(&controller).await;
        assert_eq!(controller.status().executing_line_idx, paused_line);
    }

    #[tokio::test]
    async fn test_cancel_is_prompt() {
        let (_file, controller, _stream) = ready_controller(&program(4000), 50);
        controller.execute().unwrap();
        wait_for(&controller, |status| status.executing_line_idx >= 0).await;

        let started = Instant::now();
        controller.cancel().unwrap();
        timeout(Duration::from_secs(2), controller.join()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(controller.status().command_state, CommandState::Canceled);
        assert!(controller.buffer().unwrap().is_empty());

        controller.reset().unwrap();
        assert_eq!(controller.status().command_state, CommandState::Idle);
    }
}
