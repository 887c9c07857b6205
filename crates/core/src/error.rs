use thiserror::Error;

use crate::job::CommandState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Error {} {} file at `{}`: {}", .action, .file_description, .path, .original)]
    Yaml {
        action: String,
        file_description: String,
        path: String,
        original: serde_yaml::Error,
    },

    #[error("IO error with {} file at path `{}`: {}", .file_description, .path, .original)]
    Io {
        file_description: String,
        path: String,
        original: std::io::Error,
    },

    #[error("The line index of `{}` has not been built yet.", .0)]
    IndexNotBuilt(String),

    #[error("Building the line index of `{}` failed: {}", .path, .reason)]
    IndexBuild { path: String, reason: String },

    #[error("The text stream for `{}` has been closed.", .0)]
    StreamClosed(String),

    #[error("Line {} is out of range, the stream has {} lines.", .line, .total_lines)]
    LineOutOfRange { line: i64, total_lines: u64 },

    #[error("Cannot {} while the job is {}.", .operation, .state)]
    InvalidState {
        operation: &'static str,
        state: CommandState,
    },

    #[error("Cannot {} because a stop is already pending.", .0)]
    StopPending(&'static str),

    #[error("The command buffer is already running.")]
    BufferRunning,

    #[error("The command buffer has no source stream.")]
    BufferWithoutSource,

    #[error("Invalid settings: {}", .0)]
    InvalidSettings(String),

    #[error("Error with worker thread: {}", .0)]
    Thread(std::io::Error),

    #[error("No async runtime to run the job on: {}", .0)]
    Runtime(String),

    #[error("Terminal IO error: {}", .0)]
    Terminal(#[from] std::io::Error),
}

impl Error {
    pub fn yaml_error(
        action: String,
        file_description: String,
        path: String,
        original: serde_yaml::Error,
    ) -> Self {
        Self::Yaml {
            action,
            file_description,
            path,
            original,
        }
    }

    pub fn io_error(file_description: String, path: String, original: std::io::Error) -> Self {
        Self::Io {
            file_description,
            path,
            original,
        }
    }

    pub fn invalid_state(operation: &'static str, state: CommandState) -> Self {
        Self::InvalidState { operation, state }
    }
}
