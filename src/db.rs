//! Download history storage for the built-in download manager.
//!
//! One SQLite table, `downloads`, holds a row per submission. Rows start as
//! `queued`, move to `in_progress` when the transfer starts and end as
//! `completed` (with the name the file was stored under) or `failed` (with
//! the error message).
//!
//! This module provides:
//! - Connection pool management with WAL mode for concurrent reads
//! - Automatic migration execution
//! - The history queries the download manager runs
//!
//! # Example
//!
//! ```no_run
//! use automate_core::{Database, DownloadStatus};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("state/automate.db")).await?;
//! let id = db.insert_download("https://example.com/a.mov", "a.mov", None).await?;
//! db.set_status(id, DownloadStatus::Completed, Some("a.mov"), None).await?;
//! let history = db.download_history().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::manager::HistoryEntry;

/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connections wait this long before returning `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database or run a query.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Failed to create the directory holding the database file.
    #[error("failed to create database directory {path}: {source}")]
    Directory {
        /// Directory that could not be created.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle of one row in `downloads`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl DownloadStatus {
    /// Value stored in the `status` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `true` once the transfer has ended either way.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download history database with a connection pool.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the download history at `db_path`.
    ///
    /// This will:
    /// 1. Create the parent directory and the database file if missing
    /// 2. Enable WAL mode for concurrent reads
    /// 3. Run any pending migrations
    ///
    /// # Errors
    ///
    /// Returns `DbError::Directory` if the parent directory cannot be created,
    /// `DbError::Connection` if the connection fails, or `DbError::Migration`
    /// if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DbError::Directory {
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        // Readers (history scans) must not block the transfer jobs' updates.
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory history that lives as long as its single
    /// connection. WAL mode is not enabled.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Records a new submission as `queued` and returns its row id.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the insert fails.
    #[instrument(skip(self, comment))]
    pub async fn insert_download(
        &self,
        url: &str,
        file_name: &str,
        comment: Option<&str>,
    ) -> Result<i64, DbError> {
        let id = sqlx::query("INSERT INTO downloads (url, file_name, comment) VALUES (?, ?, ?)")
            .bind(url)
            .bind(file_name)
            .bind(comment)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(id)
    }

    /// Moves row `id` to `status`.
    ///
    /// `stored_name` replaces the planned file name when given; `error` is
    /// stored as-is. Terminal statuses also set `completed_at`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the update fails.
    #[instrument(skip(self, error))]
    pub async fn set_status(
        &self,
        id: i64,
        status: DownloadStatus,
        stored_name: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE downloads SET status = ?, file_name = COALESCE(?, file_name), error = ?, \
             completed_at = CASE WHEN ? THEN datetime('now') ELSE completed_at END WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(stored_name)
        .bind(error)
        .bind(status.is_terminal())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every download that has not failed, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn download_history(&self) -> Result<Vec<HistoryEntry>, DbError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT url, file_name FROM downloads WHERE status != ? ORDER BY id ASC",
        )
        .bind(DownloadStatus::Failed.as_str())
        .fetch_all(&self.pool)
        .await?;
        debug!(rows = rows.len(), "Read download history");
        Ok(rows
            .into_iter()
            .map(|(url, file_name)| HistoryEntry { url, file_name })
            .collect())
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.eq_ignore_ascii_case("wal"))
    }

    /// Closes all pooled connections. Call before the process exits.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}
