//! Settings and configuration path utilities.
//!
//! This module defines the tunables of the stream, the read-ahead buffer and the
//! job loop, together with functions for resolving the settings file path and
//! expanding shell variables like `~` in paths.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default path for the settings file
const DEFAULT_CONFIG_PATH: &str = "~/.gcode-stream/settings.yml";

/// Default size of one chunk read while building the line index (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
/// Default number of parsed commands kept by a command stream
pub const DEFAULT_CACHE_CAPACITY: usize = 200;
/// Default number of commands the read-ahead buffer holds
pub const DEFAULT_BUFFER_CAPACITY: usize = 20;

/// Settings for opening a command stream.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamSettings {
    /// Size in bytes of each chunk read while indexing.
    pub chunk_size: usize,
    /// Number of parsed commands kept in the parse cache.
    pub cache_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Settings for the read-ahead [`CommandBuffer`](crate::buffer::CommandBuffer).
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BufferSettings {
    /// Maximum number of queued commands before the producer backs off.
    pub capacity: usize,
    /// Pause after each enqueued command.
    pub read_interval_ms: u64,
    /// Pause while the queue is full or the source index is not built.
    pub check_source_interval_ms: u64,
}

impl BufferSettings {
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }

    pub fn check_source_interval(&self) -> Duration {
        Duration::from_millis(self.check_source_interval_ms)
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            read_interval_ms: 10,
            check_source_interval_ms: 100,
        }
    }
}

/// Settings for the job execution loop.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct JobSettings {
    /// Retry delay while the buffer is empty or the index is still building.
    pub poll_interval_ms: u64,
    /// Delay between two progress increments of a running command.
    pub tick_interval_ms: u64,
    /// Delay between two checks for a continue/stop signal while paused.
    pub pause_poll_interval_ms: u64,
}

impl JobSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms)
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            tick_interval_ms: 10,
            pause_poll_interval_ms: 50,
        }
    }
}

/// All settings, as read from the settings YAML.
///
/// Every field is optional in the file; missing values fall back to defaults.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub stream: StreamSettings,
    pub buffer: BufferSettings,
    pub job: JobSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stream: StreamSettings {
                cache_capacity: 500,
                ..StreamSettings::default()
            },
            buffer: BufferSettings::default(),
            job: JobSettings::default(),
        }
    }
}

impl Settings {
    /// Checks that the settings can drive a job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`] if a size or an interval that the
    /// loops depend on is zero.
    pub fn validate(&self) -> Result<()> {
        if self.stream.chunk_size == 0 {
            return Err(Error::InvalidSettings(
                "stream.chunk_size must be positive".to_string(),
            ));
        }
        if self.buffer.capacity == 0 {
            return Err(Error::InvalidSettings(
                "buffer.capacity must be positive".to_string(),
            ));
        }
        if self.buffer.check_source_interval_ms == 0 {
            return Err(Error::InvalidSettings(
                "buffer.check_source_interval_ms must be positive".to_string(),
            ));
        }
        if self.job.poll_interval_ms == 0 || self.job.pause_poll_interval_ms == 0 {
            return Err(Error::InvalidSettings(
                "job poll intervals must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Resolves the settings file path.
///
/// If a custom path is provided, uses that path. Otherwise, uses the default
/// settings path. Shell expansions like `~` are resolved.
///
/// # Examples
///
/// ```
/// use gcode_stream_core::config::get_config_path;
///
/// // Use default path
/// let default_path = get_config_path(&None);
///
/// // Use custom path
/// let custom_path = get_config_path(&Some("/path/to/settings.yml".to_string()));
/// ```
pub fn get_config_path(config_path_arg: &Option<String>) -> String {
    let config_path = match config_path_arg {
        Some(config_path) => config_path,
        None => DEFAULT_CONFIG_PATH,
    };

    shellexpand::tilde(config_path).to_string()
}

/// Expands shell variables like `~` in the path of a G-code file.
///
/// # Examples
///
/// ```
/// use gcode_stream_core::config::expand_gcode_path;
///
/// let expanded = expand_gcode_path("~/prints/part.gcode");
/// assert!(!expanded.starts_with('~'));
/// ```
pub fn expand_gcode_path(gcode_path: &str) -> String {
    shellexpand::tilde(gcode_path).to_string()
}
