//! Merges CLI flags with the config file.

use std::path::PathBuf;

use anyhow::{Result, bail};
use automate_core::VerbositySetting;
use automate_core::config::Settings;

use crate::cli::{Args, LOG_LEVELS};

const DATABASE_FILE: &str = "automate.db";

/// Effective default log level and whether it overrides `RUST_LOG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogSetting {
    pub(crate) level: &'static str,
    pub(crate) forced: bool,
}

/// Resolves the log level.
///
/// Priority: `--log`/`-q`/`-v` > `RUST_LOG` > config `verbosity` > `info`.
pub(crate) fn resolve_log_setting(args: &Args, verbosity: Option<VerbositySetting>) -> LogSetting {
    if let Some(level) = &args.log {
        let level = LOG_LEVELS
            .iter()
            .find(|known| **known == level.as_str())
            .copied()
            .unwrap_or("info");
        return LogSetting {
            level,
            forced: true,
        };
    }
    if args.quiet {
        return LogSetting {
            level: "error",
            forced: true,
        };
    }
    if args.verbose > 0 {
        return LogSetting {
            level: if args.verbose == 1 { "debug" } else { "trace" },
            forced: true,
        };
    }

    let level = match verbosity {
        Some(VerbositySetting::Quiet) => "error",
        Some(VerbositySetting::Verbose) => "debug",
        Some(VerbositySetting::Debug) => "trace",
        Some(VerbositySetting::Default) | None => "info",
    };
    LogSetting {
        level,
        forced: false,
    }
}

/// Location of the download history database.
pub(crate) fn resolve_db_path(settings: &Settings) -> Result<PathBuf> {
    let Some(state_dir) = settings.state_dir() else {
        bail!("Cannot determine a state directory; set `state_dir` in [settings]");
    };
    Ok(state_dir.join(DATABASE_FILE))
}
