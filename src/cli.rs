//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Log levels accepted by `--log`.
pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Poll download sources and hand new files to the download manager.
///
/// Automate runs one task per configured source or cleanup job, each on its
/// own schedule, and submits every newly discovered file exactly once.
#[derive(Parser, Debug)]
#[command(name = "automate")]
#[command(author, version, about)]
pub struct Args {
    /// Run the configured tasks until interrupted (Ctrl-C)
    #[arg(long)]
    pub start: bool,

    /// Only run this task (repeatable)
    #[arg(long = "task", value_name = "NAME", requires = "start")]
    pub tasks: Vec<String>,

    /// Download a single URL, wait for it to finish, then exit
    #[arg(long, value_name = "URL", conflicts_with = "start")]
    pub download: Option<String>,

    /// File name for --download
    #[arg(long, value_name = "NAME", requires = "download")]
    pub save_as: Option<String>,

    /// Comment recorded with --download
    #[arg(long, value_name = "TEXT", requires = "download")]
    pub comment: Option<String>,

    /// List configured tasks and exit
    #[arg(long, conflicts_with_all = ["start", "download"])]
    pub list_tasks: bool,

    /// Config file (default: $XDG_CONFIG_HOME/automate/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level filter
    #[arg(long, value_name = "LEVEL", value_parser = LOG_LEVELS, conflicts_with_all = ["verbose", "quiet"])]
    pub log: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored log output
    #[arg(long)]
    pub no_color: bool,
}

impl Args {
    /// Returns `true` when an action flag was given.
    #[must_use]
    pub fn has_action(&self) -> bool {
        self.start || self.download.is_some() || self.list_tasks
    }
}
