//! G-code Stream Core Library
//!
//! This crate streams G-code programs of any size from disk into a simulated
//! machine. Files are never loaded whole: a background scan builds a line index,
//! lines are parsed lazily into commands, and a bounded read-ahead buffer feeds
//! a job controller that can be paused, resumed, stopped and cancelled.
//!
//! # Key Features
//!
//! - **Indexed Text Stream**: Random access to any line of a large file through a balanced line index
//! - **Command Parsing**: Lenient single-pass parsing of `G`/`M` lines, parameters and comments
//! - **Parse Cache**: Bounded cache of parsed commands, shared by all readers of a stream
//! - **Read-Ahead Buffer**: Background producer with backpressure that skips non-executable lines
//! - **Job Control**: Asynchronous state machine with pause/continue/stop/cancel and status updates
//! - **Configuration Management**: YAML settings with defaults for every value
//!
//! # Examples
//!
//! Running a file to completion:
//!
//! ```no_run
//! use gcode_stream_core::command_stream::CommandStream;
//! use gcode_stream_core::file_handling::get_settings;
//! use gcode_stream_core::job::JobController;
//!
//! # async fn run() -> gcode_stream_core::error::Result<()> {
//! let settings = get_settings("/home/me/.gcode-stream/settings.yml")?;
//! let controller = JobController::new(&settings);
//! controller.power_on()?;
//! controller.load_stream(CommandStream::open("part.gcode", &settings.stream))?;
//! controller.execute()?;
//!
//! let mut status = controller.subscribe();
//! while status.changed().await.is_ok() {
//!     println!("{}", *status.borrow());
//!     if !status.borrow().command_state.is_active() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod cache;
pub mod cancel;
pub mod command;
pub mod command_stream;
pub mod config;
pub mod display;
pub mod error;
pub mod execution;
pub mod file_handling;
pub mod index;
pub mod job;
pub mod parser;
pub mod text_stream;
