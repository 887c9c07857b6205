//! G-code Stream CLI Library
//!
//! This crate provides the command-line interface for gcode-stream. It opens a
//! G-code file, runs it through the simulated machine and shows progress in the
//! terminal while taking pause, continue, stop and cancel requests from stdin.
//!
//! # Architecture
//!
//! - [`cli_args`]: Command-line argument parsing
//! - [`control`]: Interactive controls read from stdin
//! - [`report`]: In-place status line and per-command timing output
//! - [`session`]: Driving a job or listing parsed commands
//!
//! # Examples
//!
//! The CLI binary (`gcode-run`) can be used in several ways:
//!
//! ```bash
//! # Run a file with the default settings (~/.gcode-stream/settings.yml)
//! gcode-run ~/prints/part.gcode
//!
//! # Use another settings file
//! gcode-run -c ./fast.yml part.gcode
//!
//! # List 20 parsed commands from line 100 without running anything
//! gcode-run part.gcode --show 100 --count 20
//!
//! # With logging
//! RUST_LOG=debug gcode-run part.gcode
//! ```

pub mod cli_args;
pub mod control;
pub mod report;
pub mod session;
