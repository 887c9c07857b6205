//! Reading of the settings file.
//!
//! This module provides the function that loads [`Settings`] from YAML, falling
//! back to defaults when the file does not exist.

use std::fs::File;
use std::path::Path;

use log::debug;

use crate::config::Settings;
use crate::error::{Error, Result};

fn get_reader(file_description: &str, path: &str) -> Result<File> {
    match File::open(path) {
        Ok(reader) => Ok(reader),
        Err(e) => Err(Error::io_error(
            file_description.to_string(),
            path.to_string(),
            e,
        )),
    }
}

fn get_settings_reader(settings_path: &str) -> Result<Option<File>> {
    if !Path::exists(Path::new(settings_path)) {
        return Ok(None);
    }

    get_reader("settings", settings_path).map(Some)
}

/// Loads settings from a YAML file.
///
/// Returns the default settings if the file doesn't exist. Fields missing from
/// the file are filled with their defaults.
///
/// # Errors
///
/// Returns an error if:
/// - The file exists but cannot be read
/// - The file contains invalid YAML
/// - The YAML doesn't match the expected structure
/// - The resulting settings fail [`Settings::validate`]
///
/// # Examples
///
/// ```no_run
/// use gcode_stream_core::file_handling::get_settings;
///
/// let settings = get_settings("/home/me/.gcode-stream/settings.yml")?;
/// println!("Buffer capacity: {}", settings.buffer.capacity);
/// # Ok::<(), gcode_stream_core::error::Error>(())
/// ```
pub fn get_settings(settings_path: &str) -> Result<Settings> {
    let Some(settings_reader) = get_settings_reader(settings_path)? else {
        debug!("No settings at `{}`, using defaults", settings_path);
        return Ok(Settings::default());
    };

    let settings: Settings = serde_yaml::from_reader(settings_reader).map_err(|e| {
        Error::yaml_error(
            "reading".to_string(),
            "settings".to_string(),
            settings_path.to_string(),
            e,
        )
    })?;

    settings.validate()?;

    Ok(settings)
}
