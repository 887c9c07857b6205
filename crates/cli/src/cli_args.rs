//! Command-line argument parsing.
//!
//! This module defines the command-line interface structure using the `clap`
//! crate.

use clap::Parser;

/// Default number of commands printed by `--show`.
pub const DEFAULT_SHOW_COUNT: usize = 10;

/// Command-line arguments for the `gcode-run` binary.
///
/// Without `--show` the file is executed as a job; while it runs, `p`, `c`, `s`
/// and `x` followed by Enter pause, continue, stop and cancel it.
///
/// # Examples
///
/// ```rust
/// use clap::Parser;
/// use gcode_stream_cli::cli_args::Args;
///
/// let args = Args::parse_from(["gcode-run", "part.gcode", "--show", "100"]);
/// assert_eq!(args.show, Some(100));
/// ```
#[derive(Parser, Debug)] // requires `derive` feature
#[command(term_width = 0)] // Just to make testing across clap features easier
pub struct Args {
    /// Path to the G-code file to run.
    pub gcode_path: String,

    /// Path to the settings YAML.
    ///
    /// If not provided, defaults to `~/.gcode-stream/settings.yml`.
    #[arg(long, short = 'c')]
    pub config_path: Option<String>,

    /// Print the parsed commands from this line (0-based) and exit, without
    /// running the file.
    #[arg(long, value_name = "LINE")]
    pub show: Option<i64>,

    /// Number of commands printed by `--show`.
    #[arg(long, short = 'n', default_value_t = DEFAULT_SHOW_COUNT)]
    pub count: usize,
}
