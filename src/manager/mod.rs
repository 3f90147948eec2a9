//! Download manager integration.
//!
//! The core treats the download manager as a collaborator with two
//! operations: accept a submission, and enumerate past downloads. The client
//! behind [`DownloadManagerClient`] is not assumed to be thread-safe, so it is
//! owned by a single worker task and reached through [`ManagerHandle`], a
//! cloneable request/response channel.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::identifier::Identifier;

mod error;
mod filename;
mod local;

pub use error::ManagerError;
pub use filename::{file_name_for, resolve_unique_path, sanitize_filename};
pub use local::{DownloadEvent, LocalDownloadManager};

/// Pending requests the worker buffers before senders wait.
const REQUEST_BUFFER: usize = 64;

/// What the download manager is asked to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub url: String,
    pub file_name: Option<String>,
    pub comment: Option<String>,
}

impl SubmissionRecord {
    /// Record for a discovered identifier and its resolved location.
    ///
    /// The manager is handed the resolved URL so it does not need to follow
    /// the redirect again; name and comment come from the discovered form.
    #[must_use]
    pub fn for_download(original: &Identifier, resolved: &Identifier) -> Self {
        Self {
            url: resolved.as_str().to_string(),
            file_name: original
                .save_as()
                .or_else(|| resolved.save_as())
                .map(str::to_string),
            comment: original
                .comment()
                .or_else(|| resolved.comment())
                .map(str::to_string),
        }
    }
}

impl From<&Identifier> for SubmissionRecord {
    fn from(identifier: &Identifier) -> Self {
        Self::for_download(identifier, identifier)
    }
}

/// One past or current download known to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub url: String,
    pub file_name: String,
}

impl HistoryEntry {
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: file_name.into(),
        }
    }
}

/// A concrete download manager.
#[async_trait]
pub trait DownloadManagerClient: Send {
    /// Hands a download to the manager.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when the manager refuses or cannot be reached.
    async fn submit(&mut self, record: &SubmissionRecord) -> Result<(), ManagerError>;

    /// All known downloads, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError`] when the history cannot be read.
    async fn list_history(&mut self) -> Result<Vec<HistoryEntry>, ManagerError>;
}

enum Request {
    Submit {
        record: SubmissionRecord,
        reply: oneshot::Sender<Result<(), ManagerError>>,
    },
    ListHistory {
        reply: oneshot::Sender<Result<Vec<HistoryEntry>, ManagerError>>,
    },
}

/// Cloneable handle to the worker that owns a [`DownloadManagerClient`].
///
/// Calls are executed one at a time, in arrival order. The worker exits when
/// the last handle is dropped.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    requests: mpsc::Sender<Request>,
}

impl ManagerHandle {
    /// Moves `client` onto its own worker task.
    pub fn spawn<C>(client: C) -> (Self, JoinHandle<()>)
    where
        C: DownloadManagerClient + 'static,
    {
        let (requests, receiver) = mpsc::channel(REQUEST_BUFFER);
        let worker = tokio::spawn(run_worker(client, receiver));
        (Self { requests }, worker)
    }

    /// Forwards a submission to the worker.
    ///
    /// # Errors
    ///
    /// Returns the client's error, or [`ManagerError::Disconnected`] when the
    /// worker is gone.
    pub async fn submit(&self, record: SubmissionRecord) -> Result<(), ManagerError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Submit { record, reply })
            .await
            .map_err(|_| ManagerError::Disconnected)?;
        response.await.map_err(|_| ManagerError::Disconnected)?
    }

    /// Fetches the manager's history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the client's error, or [`ManagerError::Disconnected`] when the
    /// worker is gone.
    pub async fn list_history(&self) -> Result<Vec<HistoryEntry>, ManagerError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::ListHistory { reply })
            .await
            .map_err(|_| ManagerError::Disconnected)?;
        response.await.map_err(|_| ManagerError::Disconnected)?
    }
}

async fn run_worker<C>(mut client: C, mut receiver: mpsc::Receiver<Request>)
where
    C: DownloadManagerClient,
{
    while let Some(request) = receiver.recv().await {
        match request {
            Request::Submit { record, reply } => {
                let result = client.submit(&record).await;
                let _ = reply.send(result);
            }
            Request::ListHistory { reply } => {
                let result = client.list_history().await;
                let _ = reply.send(result);
            }
        }
    }
    debug!("Download manager worker stopped");
}
