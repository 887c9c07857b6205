//! The job: a state machine that streams commands from a file and executes
//! them, with pause, resume, stop and cancel control.

pub mod controller;
pub mod status;

pub use controller::JobController;
pub use status::{CommandState, ControlSignal, JobStatus, NO_LINE};
