//! Running a file from the terminal.

use std::future::Future;
use std::io::{stdout, Write};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use gcode_stream_core::command_stream::CommandStream;
use gcode_stream_core::config::Settings;
use gcode_stream_core::error::{Error, Result};
use gcode_stream_core::job::{CommandState, JobController, JobStatus};
use gcode_stream_core::text_stream::IndexState;

use crate::control::{ControlCommand, HELP};
use crate::report::{format_command, StatusReporter};

/// Waits until the line index of `stream` is built.
///
/// # Errors
///
/// Returns the indexing failure, or [`Error::StreamClosed`] if the stream was
/// closed first.
pub async fn wait_for_index(stream: &CommandStream, settings: &Settings) -> Result<()> {
    loop {
        match stream.index_state() {
            IndexState::Built => return Ok(()),
            IndexState::Building => tokio::time::sleep(settings.job.poll_interval()).await,
            IndexState::Failed => {
                let reason = stream
                    .text_stream()
                    .failure()
                    .map_or_else(|| "unknown failure".to_string(), ToString::to_string);
                return Err(Error::IndexBuild {
                    path: stream.path().to_string(),
                    reason,
                });
            }
            IndexState::Closed => return Err(Error::StreamClosed(stream.path().to_string())),
        }
    }
}

/// Writes `count` parsed commands starting at `start_line`, one per line.
///
/// # Errors
///
/// Returns an error if `start_line` is out of range or a line cannot be read.
pub fn show_commands<W: Write>(
    out: &mut W,
    stream: &CommandStream,
    start_line: i64,
    count: usize,
) -> Result<()> {
    for command in stream.sequence(start_line)?.take(count) {
        writeln!(out, "{}", format_command(&*command?))?;
    }
    out.flush()?;
    Ok(())
}

/// Runs `stream` to the end, reporting progress on stdout and taking controls.
///
/// Ctrl-C cancels the job. Returns the state the job ended in.
///
/// # Errors
///
/// Returns an error if the job cannot be started or the terminal cannot be
/// written.
pub async fn run_job(
    controller: &JobController,
    stream: Arc<CommandStream>,
    controls: mpsc::Receiver<ControlCommand>,
) -> Result<JobStatus> {
    run_job_with(controller, stream, controls, stdout(), tokio::signal::ctrl_c()).await
}

/// Runs `stream` to the end, reporting to `out`. The job is cancelled once
/// `interrupt` completes, however early that happens.
///
/// # Errors
///
/// Same as [`run_job`].
pub async fn run_job_with<W: Write, I: Future>(
    controller: &JobController,
    stream: Arc<CommandStream>,
    mut controls: mpsc::Receiver<ControlCommand>,
    out: W,
    interrupt: I,
) -> Result<JobStatus> {
    let mut reporter = StatusReporter::new(out, Arc::clone(&stream));
    let mut status = controller.subscribe();

    controller.load_stream(stream)?;
    controller.execute()?;
    info!("Job started");
    eprintln!("{HELP}");

    tokio::pin!(interrupt);
    let mut interrupted = false;
    let mut controls_open = true;
    loop {
        let current = status.borrow_and_update().clone();
        reporter.report(&current)?;
        if !current.command_state.is_active() {
            break;
        }

        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            control = controls.recv(), if controls_open => match control {
                Some(ControlCommand::Help) => eprintln!("\n{HELP}"),
                Some(control) => {
                    debug!("Control request: {}", control);
                    if let Err(e) = control.apply(controller) {
                        warn!("{} ignored: {}", control, e);
                    }
                }
                None => controls_open = false,
            },
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                info!("Interrupted, cancelling the job");
                if let Err(e) = controller.cancel() {
                    debug!("Cancel on interrupt: {}", e);
                }
            }
        }
    }

    controller.join().await;
    let last = controller.status();
    reporter.report(&last)?;
    reporter.finish()?;
    Ok(last)
}

/// Whether a job that ended in `state` ran to completion or was stopped.
pub fn ended_cleanly(state: CommandState) -> bool {
    state == CommandState::Idle
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcode_stream_core::config::StreamSettings;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn write_gcode(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_show_commands_from_middle() {
        let file = write_gcode("G28\n; home done\nG1 X5 Y5\nM84\n");
        let settings = Settings::default();
        let stream = CommandStream::open(file.path().to_str().unwrap(), &settings.stream);
        wait_for_index(&stream, &settings).await.unwrap();

        let mut out = Vec::new();
        show_commands(&mut out, &stream, 1, 2).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "1\t-\t\t; home done\n2\tG1\tX=5 Y=5\n");
    }

    #[tokio::test]
    async fn test_show_commands_out_of_range() {
        let file = write_gcode("G28\n");
        let settings = Settings::default();
        let stream = CommandStream::open(file.path().to_str().unwrap(), &settings.stream);
        wait_for_index(&stream, &settings).await.unwrap();

        let mut out = Vec::new();
        assert!(show_commands(&mut out, &stream, 5, 1).is_err());
    }

    #[tokio::test]
    async fn test_wait_for_index_missing_file() {
        let settings = Settings::default();
        let stream = CommandStream::open("/this/path/does/not/exist.gcode", &StreamSettings::default());
        assert!(wait_for_index(&stream, &settings).await.is_err());
    }

    #[tokio::test]
    async fn test_early_interrupt_cancels_job() {
        let content: String = (0..200).map(|i| format!("G1 X{i}\n")).collect();
        let file = write_gcode(&content);
        let mut settings = Settings::default();
        settings.job.tick_interval_ms = 20;
        let controller = JobController::new(&settings);
        controller.power_on().unwrap();
        let stream = CommandStream::open(file.path().to_str().unwrap(), &settings.stream);

        let (_control_sender, controls) = mpsc::channel(1);
        let (interrupt_sender, interrupt) = tokio::sync::oneshot::channel::<()>();
        interrupt_sender.send(()).unwrap();

        let status = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            run_job_with(&controller, stream, controls, Vec::new(), interrupt),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(status.command_state, CommandState::Canceled);
        assert!(!ended_cleanly(status.command_state));
    }

    #[test]
    fn test_ended_cleanly() {
        assert!(ended_cleanly(CommandState::Idle));
        assert!(!ended_cleanly(CommandState::Canceled));
        assert!(!ended_cleanly(CommandState::PrintFailed));
    }
}
