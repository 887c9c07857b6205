use std::io::stdout;
use std::process::ExitCode;

use clap::Parser;
use log::{debug, info};

use gcode_stream_cli::cli_args::Args;
use gcode_stream_cli::control::spawn_stdin_reader;
use gcode_stream_cli::session::{ended_cleanly, run_job, show_commands, wait_for_index};
use gcode_stream_core::command_stream::CommandStream;
use gcode_stream_core::config::{expand_gcode_path, get_config_path};
use gcode_stream_core::error::Result;
use gcode_stream_core::file_handling::get_settings;
use gcode_stream_core::job::JobController;

async fn execute() -> Result<bool> {
    let args = Args::parse();

    let config_path = get_config_path(&args.config_path);
    debug!("Config path: `{}`", config_path);
    let settings = get_settings(&config_path)?;

    let gcode_path = expand_gcode_path(&args.gcode_path);
    let stream = CommandStream::open(&gcode_path, &settings.stream);

    if let Some(start_line) = args.show {
        wait_for_index(&stream, &settings).await?;
        show_commands(&mut stdout(), &stream, start_line, args.count)?;
        return Ok(true);
    }

    let controller = JobController::new(&settings);
    controller.power_on()?;
    let status = run_job(&controller, stream, spawn_stdin_reader()).await?;
    info!("Job ended {}", status.command_state);
    println!("Job ended: {}", status.command_state);

    let clean = ended_cleanly(status.command_state);
    if !clean {
        controller.reset()?;
    }
    controller.shutdown()?;
    Ok(clean)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match execute().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
