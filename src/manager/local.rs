//! Built-in download manager: SQLite history plus streaming HTTP transfers.
//!
//! Submissions are recorded immediately and transferred in the background.
//! Each transfer ends with a [`DownloadEvent`] on the channel returned by
//! [`LocalDownloadManager::new`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use super::filename::{file_name_for, resolve_unique_path};
use super::{DownloadManagerClient, HistoryEntry, ManagerError, SubmissionRecord};
use crate::db::{Database, DownloadStatus};
use crate::fetch::{HttpFetcher, NetworkError};
use crate::identifier::Identifier;

/// Outcome of one background transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// The file was stored at `path`.
    Finished { url: String, path: PathBuf },
    /// The transfer failed; the history row is marked failed.
    Failed { url: String, error: String },
}

impl DownloadEvent {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Finished { url, .. } | Self::Failed { url, .. } => url,
        }
    }
}

/// Download manager that stores files under one output directory.
///
/// Failed transfers are excluded from [`list_history`](DownloadManagerClient::list_history)
/// so the next poll cycle submits them again.
#[derive(Debug)]
pub struct LocalDownloadManager {
    db: Database,
    fetch: HttpFetcher,
    output_dir: PathBuf,
    events: mpsc::UnboundedSender<DownloadEvent>,
}

impl LocalDownloadManager {
    /// Creates the manager and the receiving end of its event channel.
    #[must_use]
    pub fn new(
        db: Database,
        fetch: HttpFetcher,
        output_dir: PathBuf,
    ) -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                db,
                fetch,
                output_dir,
                events,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl DownloadManagerClient for LocalDownloadManager {
    #[instrument(skip(self, record), fields(url = %record.url))]
    async fn submit(&mut self, record: &SubmissionRecord) -> Result<(), ManagerError> {
        let mut identifier =
            Identifier::parse(&record.url).map_err(|e| ManagerError::rejected(&record.url, e))?;
        if let Some(name) = &record.file_name {
            identifier = identifier.with_save_as(name.clone());
        }
        let file_name = file_name_for(&identifier);

        let row_id = self
            .db
            .insert_download(&record.url, &file_name, record.comment.as_deref())
            .await?;
        info!(file_name = %file_name, "Download queued");

        let job = TransferJob {
            row_id,
            identifier,
            file_name,
            db: self.db.clone(),
            fetch: self.fetch.clone(),
            output_dir: self.output_dir.clone(),
            events: self.events.clone(),
        };
        tokio::spawn(job.run());
        Ok(())
    }

    async fn list_history(&mut self) -> Result<Vec<HistoryEntry>, ManagerError> {
        Ok(self.db.download_history().await?)
    }
}

struct TransferJob {
    row_id: i64,
    identifier: Identifier,
    file_name: String,
    db: Database,
    fetch: HttpFetcher,
    output_dir: PathBuf,
    events: mpsc::UnboundedSender<DownloadEvent>,
}

impl TransferJob {
    async fn run(self) {
        self.record_status(DownloadStatus::InProgress, None, None).await;
        let url = self.identifier.to_string();

        let event = match self.transfer().await {
            Ok(path) => {
                let stored_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned());
                self.record_status(DownloadStatus::Completed, stored_name.as_deref(), None)
                    .await;
                info!(url = %url, path = %path.display(), "Download complete");
                DownloadEvent::Finished { url, path }
            }
            Err(failure) => {
                let message = failure.to_string();
                self.record_status(DownloadStatus::Failed, None, Some(&message)).await;
                error!(url = %url, error = %message, "Download failed");
                DownloadEvent::Failed {
                    url,
                    error: message,
                }
            }
        };
        let _ = self.events.send(event);
    }

    async fn transfer(&self) -> Result<PathBuf, ManagerError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ManagerError::io(&self.output_dir, e))?;

        let response = self
            .fetch
            .get(&self.identifier)
            .await
            .map_err(|source| ManagerError::Transfer {
                url: self.identifier.to_string(),
                source,
            })?;

        let path = resolve_unique_path(&self.output_dir, &self.file_name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| ManagerError::io(&path, e))?;

        if let Err(failure) = stream_to_file(file, response, &self.identifier, &path).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(failure);
        }
        Ok(path)
    }

    async fn record_status(
        &self,
        status: DownloadStatus,
        file_name: Option<&str>,
        message: Option<&str>,
    ) {
        if let Err(error) = self
            .db
            .set_status(self.row_id, status, file_name, message)
            .await
        {
            warn!(row_id = self.row_id, status = %status, error = %error, "Failed to update download history");
        }
    }
}

async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    identifier: &Identifier,
    path: &Path,
) -> Result<u64, ManagerError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ManagerError::Transfer {
            url: identifier.to_string(),
            source: NetworkError::network(identifier.as_str(), e),
        })?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| ManagerError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| ManagerError::io(path, e))?;
    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fetch::FetchSettings;

    async fn manager(dir: &Path) -> (LocalDownloadManager, mpsc::UnboundedReceiver<DownloadEvent>) {
        let db = Database::new_in_memory().await.unwrap();
        let fetch = HttpFetcher::new(FetchSettings::default()).unwrap();
        LocalDownloadManager::new(db, fetch, dir.to_path_buf())
    }

    #[tokio::test]
    async fn test_rejects_malformed_submission() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, _events) = manager(dir.path()).await;
        let record = SubmissionRecord {
            url: "not a url".to_string(),
            file_name: None,
            comment: None,
        };
        let error = manager.submit(&record).await.unwrap_err();
        assert!(matches!(error, ManagerError::Rejected { .. }));
        assert!(manager.list_history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_chronological_and_skips_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, _events) = manager(dir.path()).await;
        for (url, name, status) in [
            ("https://example.com/old.mov", "old.mov", DownloadStatus::Completed),
            ("https://example.com/broken.mov", "broken.mov", DownloadStatus::Failed),
            ("https://example.com/new.mov", "new.mov", DownloadStatus::Queued),
        ] {
            let id = manager.db.insert_download(url, name, None).await.unwrap();
            manager.db.set_status(id, status, None, None).await.unwrap();
        }

        let history = manager.list_history().await.unwrap();
        assert_eq!(history, vec![
            HistoryEntry::new("https://example.com/old.mov", "old.mov"),
            HistoryEntry::new("https://example.com/new.mov", "new.mov"),
        ]);
    }

    #[test]
    fn test_event_url_accessor() {
        let event = DownloadEvent::Failed {
            url: "https://example.com/a".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(event.url(), "https://example.com/a");
    }
}
