//! In-memory doubles for the network, the download manager and sources.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::fetch::{Fetch, NetworkError};
use crate::identifier::{Comparator, Identifier};
use crate::manager::{DownloadManagerClient, HistoryEntry, ManagerError, SubmissionRecord};
use crate::source::Source;

fn canonical(url: &str) -> String {
    Identifier::parse(url).unwrap().as_str().to_string()
}

/// Fetcher serving fixed pages and redirects. Unknown pages answer 404,
/// configured failures answer 503.
#[derive(Debug, Default)]
pub(crate) struct StubFetch {
    pages: HashMap<String, String>,
    redirects: HashMap<String, String>,
    failures: HashSet<String>,
    text_requests: Mutex<HashMap<String, usize>>,
}

impl StubFetch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(canonical(url), body.to_string());
        self
    }

    pub(crate) fn with_redirect(mut self, from: &str, to: &str) -> Self {
        self.redirects.insert(canonical(from), canonical(to));
        self
    }

    pub(crate) fn with_failure(mut self, url: &str) -> Self {
        self.failures.insert(canonical(url));
        self
    }

    pub(crate) fn text_requests(&self, url: &str) -> usize {
        self.text_requests
            .lock()
            .unwrap()
            .get(&canonical(url))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Fetch for StubFetch {
    async fn resolve(&self, identifier: &Identifier) -> Result<Identifier, NetworkError> {
        tokio::task::yield_now().await;
        if self.failures.contains(identifier.as_str()) {
            return Err(NetworkError::http_status(identifier.as_str(), 503));
        }
        let target = self
            .redirects
            .get(identifier.as_str())
            .map_or_else(|| identifier.as_str().to_string(), Clone::clone);
        let mut resolved = Identifier::parse(&target).unwrap();
        if let Some(comment) = identifier.comment() {
            resolved = resolved.with_comment(comment);
        }
        Ok(resolved)
    }

    async fn get_text(&self, identifier: &Identifier) -> Result<String, NetworkError> {
        *self
            .text_requests
            .lock()
            .unwrap()
            .entry(identifier.as_str().to_string())
            .or_default() += 1;
        if self.failures.contains(identifier.as_str()) {
            return Err(NetworkError::http_status(identifier.as_str(), 503));
        }
        self.pages
            .get(identifier.as_str())
            .cloned()
            .ok_or_else(|| NetworkError::http_status(identifier.as_str(), 404))
    }
}

type SubmitHook = Box<dyn FnMut(usize) + Send>;

/// Shared view into a [`RecordingManager`] after it moved onto its worker.
#[derive(Clone, Default)]
pub(crate) struct ManagerRecorder {
    history: Arc<Mutex<Vec<HistoryEntry>>>,
    submissions: Arc<Mutex<Vec<SubmissionRecord>>>,
    list_calls: Arc<AtomicUsize>,
    on_submit: Arc<Mutex<Option<SubmitHook>>>,
}

impl ManagerRecorder {
    pub(crate) fn submissions(&self) -> Vec<SubmissionRecord> {
        self.submissions.lock().unwrap().clone()
    }

    pub(crate) fn submitted_urls(&self) -> Vec<String> {
        self.submissions().into_iter().map(|r| r.url).collect()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }

    /// Runs `hook` with the submission count after every submission.
    pub(crate) fn on_submit(&self, hook: impl FnMut(usize) + Send + 'static) {
        *self.on_submit.lock().unwrap() = Some(Box::new(hook));
    }
}

/// Download manager that records submissions and appends them to its history.
pub(crate) struct RecordingManager {
    recorder: ManagerRecorder,
    unavailable: bool,
}

impl RecordingManager {
    pub(crate) fn new(history: Vec<HistoryEntry>) -> (Self, ManagerRecorder) {
        let recorder = ManagerRecorder::default();
        *recorder.history.lock().unwrap() = history;
        (
            Self {
                recorder: recorder.clone(),
                unavailable: false,
            },
            recorder,
        )
    }

    /// A manager whose history can never be read.
    pub(crate) fn unavailable() -> (Self, ManagerRecorder) {
        let (mut manager, recorder) = Self::new(Vec::new());
        manager.unavailable = true;
        (manager, recorder)
    }
}

#[async_trait]
impl DownloadManagerClient for RecordingManager {
    async fn submit(&mut self, record: &SubmissionRecord) -> Result<(), ManagerError> {
        let file_name = record.file_name.clone().unwrap_or_else(|| {
            record.url.rsplit('/').next().unwrap_or_default().to_string()
        });
        self.recorder
            .history
            .lock()
            .unwrap()
            .push(HistoryEntry::new(record.url.clone(), file_name));
        let count = {
            let mut submissions = self.recorder.submissions.lock().unwrap();
            submissions.push(record.clone());
            submissions.len()
        };
        if let Some(hook) = self.recorder.on_submit.lock().unwrap().as_mut() {
            hook(count);
        }
        Ok(())
    }

    async fn list_history(&mut self) -> Result<Vec<HistoryEntry>, ManagerError> {
        self.recorder.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(ManagerError::unavailable("manager offline"));
        }
        Ok(self.recorder.history.lock().unwrap().clone())
    }
}

/// Source yielding a fixed list.
pub(crate) struct StaticSource {
    name: String,
    items: Vec<Identifier>,
    comparator: Comparator,
    record_candidates: bool,
    seen: Mutex<Vec<String>>,
    lists: AtomicUsize,
    finished: Mutex<Vec<(Vec<String>, PathBuf)>>,
}

impl StaticSource {
    pub(crate) fn new(name: &str, items: Vec<Identifier>) -> Self {
        Self {
            name: name.to_string(),
            items,
            comparator: Comparator::Exact,
            record_candidates: false,
            seen: Mutex::new(Vec::new()),
            lists: AtomicUsize::new(0),
            finished: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn from_urls(name: &str, urls: &[&str]) -> Self {
        Self::new(
            name,
            urls.iter().map(|u| Identifier::parse(u).unwrap()).collect(),
        )
    }

    pub(crate) fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    /// Records every candidate passed to `equal`.
    pub(crate) fn recording_candidates(mut self) -> Self {
        self.record_candidates = true;
        self
    }

    pub(crate) fn seen_candidates(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Identifiers and path of every `download_finished` call.
    pub(crate) fn finished(&self) -> Vec<(Vec<String>, PathBuf)> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl Source for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self) -> BoxStream<'_, Identifier> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        stream::iter(self.items.clone()).boxed()
    }

    fn comparator(&self) -> Comparator {
        self.comparator
    }

    fn equal(&self, _original: &Identifier, resolved: &Identifier, candidate: &Identifier) -> bool {
        if self.record_candidates {
            self.seen.lock().unwrap().push(candidate.to_string());
        }
        self.comparator.matches(resolved, candidate)
    }

    async fn download_finished(&self, identifiers: &[Identifier], path: &Path) {
        self.finished.lock().unwrap().push((
            identifiers.iter().map(ToString::to_string).collect(),
            path.to_path_buf(),
        ));
    }
}
