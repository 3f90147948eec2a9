//! Automate Core Library
//!
//! Polls download sources (feeds, scraped pages) on independent schedules
//! and hands every newly discovered file to a download manager exactly once,
//! even when several sources find the same file behind different URLs.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`identifier`] - Canonical URLs, metadata and equality strategies
//! - [`fetch`] - HTTP access: redirect resolution, page fetches with retry
//! - [`source`] - Feed and HTML sources yielding download candidates
//! - [`manager`] - Download manager client trait, actor handle, built-in manager
//! - [`db`] - SQLite storage for the built-in manager's history
//! - [`registry`] - Cached view of the manager's history
//! - [`dedup`] - Submit-once decision per discovered identifier
//! - [`scheduler`] - Periodic tasks with cooperative stop
//! - [`cleanup`] - Filesystem cleanup tasks
//! - [`completion`] - Routing of finished downloads back to sources
//! - [`config`] - TOML configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cleanup;
pub mod completion;
pub mod config;
pub mod db;
pub mod dedup;
pub mod fetch;
pub mod identifier;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod source;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use cleanup::{CleanupRule, CleanupTask};
pub use completion::CompletionRouter;
pub use config::{ConfigError, FileConfig, LoadedConfig, VerbositySetting, load_config};
pub use db::{Database, DbError, DownloadStatus};
pub use dedup::{DedupEngine, DedupError, Outcome};
pub use fetch::{Fetch, FetchSettings, HttpFetcher, NetworkError};
pub use identifier::{Comparator, Identifier, IdentifierError};
pub use manager::{
    DownloadEvent, DownloadManagerClient, HistoryEntry, LocalDownloadManager, ManagerError,
    ManagerHandle, SubmissionRecord,
};
pub use registry::{DownloadRegistry, RegistryError};
pub use scheduler::{
    DownloadTask, ScheduledTask, Scheduler, SchedulerError, StopSignal, Stopper, Task, TaskState,
    check_task_names, select_tasks, stop_channel,
};
pub use source::{FeedSource, HtmlSource, Source, SourceError};
