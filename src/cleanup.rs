//! Periodic filesystem cleanup.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::scheduler::{StopSignal, Task};

/// One thing to remove under a cleanup root.
#[derive(Debug, Clone)]
pub enum CleanupRule {
    /// Removes the directory at `root/<name>` with all its contents.
    RemoveDir { name: String },
    /// Removes files anywhere under root whose name matches `pattern`.
    /// With `first_line`, only files whose first line equals it.
    RemoveFiles {
        pattern: Regex,
        first_line: Option<String>,
    },
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub dirs_removed: usize,
    pub files_removed: usize,
}

#[derive(Debug)]
struct CleanupJob {
    root: PathBuf,
    rules: Vec<CleanupRule>,
}

/// Task applying [`CleanupRule`]s to a directory tree.
#[derive(Debug, Clone)]
pub struct CleanupTask {
    name: String,
    job: Arc<CleanupJob>,
}

impl CleanupTask {
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, rules: Vec<CleanupRule>) -> Self {
        Self {
            name: name.into(),
            job: Arc::new(CleanupJob {
                root: root.into(),
                rules,
            }),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.job.root
    }

    /// Runs every rule once, checking `stop` between entries.
    #[must_use]
    pub fn sweep(&self, stop: &StopSignal) -> CleanupReport {
        self.job.sweep(stop)
    }
}

#[async_trait]
impl Task for CleanupTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, stop: &StopSignal) {
        let job = self.job.clone();
        let stop = stop.clone();
        match tokio::task::spawn_blocking(move || job.sweep(&stop)).await {
            Ok(report) => debug!(
                dirs_removed = report.dirs_removed,
                files_removed = report.files_removed,
                "Cleanup complete"
            ),
            Err(e) => error!(error = %e, "Cleanup sweep failed"),
        }
    }
}

impl CleanupJob {
    fn sweep(&self, stop: &StopSignal) -> CleanupReport {
        let mut report = CleanupReport::default();

        for rule in &self.rules {
            if stop.is_stopped() {
                break;
            }
            match rule {
                CleanupRule::RemoveDir { name } => {
                    if self.remove_dir(name) {
                        report.dirs_removed += 1;
                    }
                }
                CleanupRule::RemoveFiles {
                    pattern,
                    first_line,
                } => {
                    report.files_removed +=
                        self.remove_files(pattern, first_line.as_deref(), stop);
                }
            }
        }
        report
    }

    fn remove_dir(&self, name: &str) -> bool {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return false;
        }

        debug!(path = %dir.display(), "Remove folder");
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => true,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "Failed to remove folder");
                false
            }
        }
    }

    fn remove_files(&self, pattern: &Regex, first_line: Option<&str>, stop: &StopSignal) -> usize {
        let mut removed = 0;

        for entry in WalkDir::new(&self.root).follow_links(false) {
            if stop.is_stopped() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    error!(root = %self.root.display(), error = %e, "Failed to walk directory");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let matches_name = entry
                .file_name()
                .to_str()
                .is_some_and(|name| pattern.is_match(name));
            if !matches_name {
                continue;
            }

            let path = entry.path();
            if let Some(expected) = first_line {
                match read_first_line(path) {
                    Ok(line) if line == expected => {}
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Failed to read file");
                        continue;
                    }
                }
            }

            debug!(path = %path.display(), "Remove file");
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => debug!(path = %path.display(), error = %e, "Failed to remove file"),
            }
        }
        removed
    }
}

fn read_first_line(path: &Path) -> io::Result<String> {
    let mut line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
