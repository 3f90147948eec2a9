//! In-process view of the download manager's history.
//!
//! The registry answers "was this already downloaded?" without asking the
//! manager every time. Its cache is built lazily: the manager's history is
//! fetched once per cache generation and consumed newest-first, one entry at
//! a time, only as far as a lookup needs. Anything submitted from this
//! process is recorded immediately so a quick repeat check sees it before the
//! manager's own history does.
//!
//! The cache is dropped wholesale once the refresh interval has elapsed since
//! the last full scan, because the history can be purged or edited outside
//! this process. There is no partial eviction.
//!
//! All state sits behind one async mutex. [`DownloadRegistry::submit_if_new`]
//! holds it across the check and the submission, so concurrent tasks that
//! discover the same download submit it once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::fetch::Fetch;
use crate::identifier::Identifier;
use crate::manager::{HistoryEntry, ManagerHandle, SubmissionRecord, file_name_for};
use crate::source::Source;

mod error;

pub use error::RegistryError;

/// Default lifetime of a cache generation.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Shared cache of known downloads.
pub struct DownloadRegistry {
    manager: ManagerHandle,
    fetch: Arc<dyn Fetch>,
    refresh_interval: Duration,
    state: Mutex<RegistryState>,
}

struct RegistryState {
    known: Vec<Identifier>,
    known_set: HashSet<Identifier>,
    by_file_name: HashMap<String, Vec<Identifier>>,
    /// Discovered and resolved forms of this generation's submissions, by submitted URL.
    submitted: HashMap<String, Vec<Identifier>>,
    /// Unconsumed history, newest first. `None` until fetched for this generation.
    pending: Option<VecDeque<HistoryEntry>>,
    fully_cached: bool,
    last_reset: Instant,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            known: Vec::new(),
            known_set: HashSet::new(),
            by_file_name: HashMap::new(),
            submitted: HashMap::new(),
            pending: None,
            fully_cached: false,
            last_reset: Instant::now(),
        }
    }

    fn expire_if_due(&mut self, refresh_interval: Duration) {
        if self.last_reset.elapsed() < refresh_interval {
            return;
        }
        info!("Reset downloads list cache");
        *self = Self::new();
    }

    fn remember(&mut self, identifier: Identifier, file_name: String) {
        let by_name = self.by_file_name.entry(file_name).or_default();
        if !by_name.contains(&identifier) {
            by_name.push(identifier.clone());
        }
        if self.known_set.insert(identifier.clone()) {
            self.known.push(identifier);
        }
    }

    /// Consumes the next history entry into the cache.
    fn next_from_history(&mut self) -> Option<Identifier> {
        loop {
            let entry = self.pending.as_mut()?.pop_front()?;
            match Identifier::parse(&entry.url) {
                Ok(identifier) => {
                    self.remember(identifier.clone(), entry.file_name);
                    return Some(identifier);
                }
                Err(error) => {
                    warn!(url = %entry.url, error = %error, "Ignoring unparseable history entry");
                }
            }
        }
    }

    fn mark_fully_cached(&mut self) {
        self.pending = None;
        self.fully_cached = true;
        self.last_reset = Instant::now();
    }
}

impl DownloadRegistry {
    #[must_use]
    pub fn new(manager: ManagerHandle, fetch: Arc<dyn Fetch>) -> Self {
        Self {
            manager,
            fetch,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            state: Mutex::new(RegistryState::new()),
        }
    }

    #[must_use]
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// Resolves `identifier` and reports whether it is already known.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Resolve`] when resolution fails and
    /// [`RegistryError::Unavailable`] when the history cannot be read.
    #[instrument(skip(self, identifier, source), fields(url = %identifier, source = source.name()))]
    pub async fn has_url(
        &self,
        identifier: &Identifier,
        source: &dyn Source,
    ) -> Result<bool, RegistryError> {
        let resolved = identifier
            .resolve(self.fetch.as_ref())
            .await
            .map_err(|e| RegistryError::resolve(identifier.as_str(), e))?;
        if resolved != *identifier {
            debug!(redirect = %resolved, "Redirect");
        }
        self.contains(identifier, &resolved, source).await
    }

    /// Reports whether the already resolved identifier is known.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] when the history cannot be read.
    pub async fn contains(
        &self,
        original: &Identifier,
        resolved: &Identifier,
        source: &dyn Source,
    ) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        self.scan(&mut state, |candidate| {
            source.equal(original, resolved, candidate)
        })
        .await
    }

    /// Submits the download unless it is already known, atomically.
    ///
    /// Returns `true` when a submission was made.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] when the history cannot be read
    /// (nothing is submitted) and [`RegistryError::Submission`] when the
    /// manager refuses the download.
    pub async fn submit_if_new(
        &self,
        original: &Identifier,
        resolved: &Identifier,
        source: &dyn Source,
    ) -> Result<bool, RegistryError> {
        let mut state = self.state.lock().await;
        let known = self
            .scan(&mut state, |candidate| {
                source.equal(original, resolved, candidate)
            })
            .await?;
        if known {
            return Ok(false);
        }
        self.submit_locked(&mut state, original, resolved).await?;
        Ok(true)
    }

    /// Submits `identifier` unconditionally (ad hoc downloads).
    ///
    /// Resolution is attempted so both forms are recorded; when it fails the
    /// identifier is submitted as given. Returns the submitted form.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Submission`] when the manager refuses it.
    #[instrument(skip(self, identifier), fields(url = %identifier))]
    pub async fn download_url(&self, identifier: &Identifier) -> Result<Identifier, RegistryError> {
        let resolved = match identifier.resolve(self.fetch.as_ref()).await {
            Ok(resolved) => resolved,
            Err(error) => {
                debug!(error = %error, "Submitting unresolved URL");
                identifier.clone()
            }
        };
        let mut state = self.state.lock().await;
        self.submit_locked(&mut state, identifier, &resolved).await?;
        Ok(resolved)
    }

    /// Identifiers whose download was stored under `name`.
    ///
    /// Reads the whole history first so the file-name index is complete.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] when the history cannot be read.
    pub async fn urls_by_file_name(&self, name: &str) -> Result<Vec<Identifier>, RegistryError> {
        let mut state = self.state.lock().await;
        self.scan(&mut state, |_| false).await?;
        Ok(state.by_file_name.get(name).cloned().unwrap_or_default())
    }

    /// Identifiers behind a transfer of `url` that finished as `stored_name`.
    ///
    /// The manager may store a file under a different name than planned (name
    /// collisions); the identifiers submitted as `url` are then indexed under
    /// `stored_name` too. Without a submission in this cache generation the
    /// history entries under `stored_name` with that URL are used, or all of
    /// them when none matches.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unavailable`] when the history cannot be read.
    pub async fn finished_download(
        &self,
        url: &str,
        stored_name: &str,
    ) -> Result<Vec<Identifier>, RegistryError> {
        let mut state = self.state.lock().await;
        self.scan(&mut state, |_| false).await?;

        if let Some(group) = state.submitted.get(url).cloned() {
            for identifier in &group {
                state.remember(identifier.clone(), stored_name.to_string());
            }
            return Ok(group);
        }

        let stored = state
            .by_file_name
            .get(stored_name)
            .cloned()
            .unwrap_or_default();
        let exact: Vec<Identifier> = stored
            .iter()
            .filter(|identifier| identifier.as_str() == url)
            .cloned()
            .collect();
        Ok(if exact.is_empty() { stored } else { exact })
    }

    /// Number of identifiers currently cached.
    pub async fn cached_len(&self) -> usize {
        self.state.lock().await.known.len()
    }

    async fn scan<F>(&self, state: &mut RegistryState, matches: F) -> Result<bool, RegistryError>
    where
        F: Fn(&Identifier) -> bool,
    {
        state.expire_if_due(self.refresh_interval);

        if state.known.iter().any(&matches) {
            return Ok(true);
        }
        if state.fully_cached {
            return Ok(false);
        }

        if state.pending.is_none() {
            let history = self
                .manager
                .list_history()
                .await
                .map_err(RegistryError::unavailable)?;
            debug!(entries = history.len(), "Loaded download history");
            state.pending = Some(history.into_iter().rev().collect());
        }

        while let Some(candidate) = state.next_from_history() {
            if matches(&candidate) {
                return Ok(true);
            }
        }
        state.mark_fully_cached();
        Ok(false)
    }

    async fn submit_locked(
        &self,
        state: &mut RegistryState,
        original: &Identifier,
        resolved: &Identifier,
    ) -> Result<(), RegistryError> {
        let record = SubmissionRecord::for_download(original, resolved);
        let target = match &record.file_name {
            Some(name) => resolved.clone().with_save_as(name.clone()),
            None => resolved.clone(),
        };
        let file_name = file_name_for(&target);

        self.manager
            .submit(record)
            .await
            .map_err(|e| RegistryError::submission(resolved.as_str(), e))?;

        state.remember(original.clone(), file_name.clone());
        state.remember(resolved.clone(), file_name);
        let forms = state
            .submitted
            .entry(resolved.as_str().to_string())
            .or_default();
        for identifier in [original, resolved] {
            if !forms.contains(identifier) {
                forms.push(identifier.clone());
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DownloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRegistry")
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identifier::Comparator;
    use crate::test_support::{RecordingManager, StaticSource, StubFetch};

    fn id(raw: &str) -> Identifier {
        Identifier::parse(raw).unwrap()
    }

    fn registry(
        history: Vec<HistoryEntry>,
        fetch: StubFetch,
    ) -> (DownloadRegistry, crate::test_support::ManagerRecorder) {
        let (client, recorder) = RecordingManager::new(history);
        let (handle, _worker) = ManagerHandle::spawn(client);
        (DownloadRegistry::new(handle, Arc::new(fetch)), recorder)
    }

    fn history(urls: &[&str]) -> Vec<HistoryEntry> {
        urls.iter()
            .map(|url| {
                let name = url.rsplit('/').next().unwrap_or_default();
                HistoryEntry::new(*url, name)
            })
            .collect()
    }

    // ==================== Lookups ====================

    #[tokio::test]
    async fn test_empty_history_knows_nothing() {
        let (registry, recorder) = registry(Vec::new(), StubFetch::new());
        let source = StaticSource::new("a", Vec::new());
        assert!(!registry.has_url(&id("https://example.com/a"), &source).await.unwrap());
        assert_eq!(recorder.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_has_url_finds_history_entry() {
        let (registry, _) = registry(
            history(&["https://example.com/a.mov", "https://example.com/b.mov"]),
            StubFetch::new(),
        );
        let source = StaticSource::new("a", Vec::new());
        assert!(registry.has_url(&id("https://example.com/a.mov"), &source).await.unwrap());
        assert!(!registry.has_url(&id("https://example.com/c.mov"), &source).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_url_compares_resolved_form() {
        let fetch = StubFetch::new().with_redirect("https://short.example/x", "https://cdn.example.com/a.mov");
        let (registry, _) = registry(history(&["https://cdn.example.com/a.mov"]), fetch);
        let source = StaticSource::new("a", Vec::new());
        assert!(registry.has_url(&id("https://short.example/x"), &source).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_url_uses_source_comparator() {
        let (registry, _) = registry(history(&["https://cdn1.example.com/x/foo.jpg"]), StubFetch::new());
        let exact = StaticSource::new("exact", Vec::new());
        let basename = StaticSource::new("base", Vec::new()).with_comparator(Comparator::Basename);
        let candidate = id("https://cdn2.example.com/y/foo.jpg?session=9");
        assert!(!registry.has_url(&candidate, &exact).await.unwrap());
        assert!(registry.has_url(&candidate, &basename).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_url_propagates_resolve_failure() {
        let fetch = StubFetch::new().with_failure("https://down.example.com/a");
        let (registry, recorder) = registry(Vec::new(), fetch);
        let source = StaticSource::new("a", Vec::new());
        let error = registry
            .has_url(&id("https://down.example.com/a"), &source)
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::Resolve { .. }));
        assert_eq!(recorder.list_calls(), 0);
    }

    // ==================== Scan order and laziness ====================

    #[tokio::test]
    async fn test_history_scanned_newest_first() {
        let (registry, _) = registry(
            history(&[
                "https://example.com/old",
                "https://example.com/mid",
                "https://example.com/new",
            ]),
            StubFetch::new(),
        );
        let source = StaticSource::new("a", Vec::new()).recording_candidates();
        assert!(!registry.has_url(&id("https://example.com/none"), &source).await.unwrap());
        assert_eq!(source.seen_candidates(), vec![
            "https://example.com/new",
            "https://example.com/mid",
            "https://example.com/old",
        ]);
    }

    #[tokio::test]
    async fn test_scan_stops_at_first_match() {
        let (registry, _) = registry(
            history(&[
                "https://example.com/old",
                "https://example.com/mid",
                "https://example.com/new",
            ]),
            StubFetch::new(),
        );
        let source = StaticSource::new("a", Vec::new());
        assert!(registry.has_url(&id("https://example.com/new"), &source).await.unwrap());
        assert_eq!(registry.cached_len().await, 1);
        assert!(registry.has_url(&id("https://example.com/old"), &source).await.unwrap());
        assert_eq!(registry.cached_len().await, 3);
    }

    #[tokio::test]
    async fn test_repeated_lookups_served_from_cache() {
        let (registry, recorder) = registry(history(&["https://example.com/a"]), StubFetch::new());
        let source = StaticSource::new("a", Vec::new());
        for _ in 0..5 {
            registry.has_url(&id("https://example.com/b"), &source).await.unwrap();
        }
        assert_eq!(recorder.list_calls(), 1);
    }

    // ==================== Expiry ====================

    #[tokio::test(start_paused = true)]
    async fn test_expiry_triggers_exactly_one_rescan() {
        let (registry, recorder) = registry(history(&["https://example.com/a"]), StubFetch::new());
        let registry = registry.with_refresh_interval(Duration::from_secs(3600));
        let source = StaticSource::new("a", Vec::new());
        let missing = id("https://example.com/missing");

        assert!(!registry.has_url(&missing, &source).await.unwrap());
        assert_eq!(recorder.list_calls(), 1);

        tokio::time::advance(Duration::from_secs(1800)).await;
        assert!(!registry.has_url(&missing, &source).await.unwrap());
        assert_eq!(recorder.list_calls(), 1);

        tokio::time::advance(Duration::from_secs(1801)).await;
        assert!(!registry.has_url(&missing, &source).await.unwrap());
        assert_eq!(recorder.list_calls(), 2);
        assert!(!registry.has_url(&missing, &source).await.unwrap());
        assert_eq!(recorder.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_sees_external_purge() {
        let (registry, recorder) = registry(history(&["https://example.com/a"]), StubFetch::new());
        let source = StaticSource::new("a", Vec::new());
        assert!(registry.has_url(&id("https://example.com/a"), &source).await.unwrap());

        recorder.clear_history();
        tokio::time::advance(DEFAULT_REFRESH_INTERVAL).await;
        assert!(!registry.has_url(&id("https://example.com/a"), &source).await.unwrap());
    }

    // ==================== Submission ====================

    #[tokio::test]
    async fn test_submit_if_new_submits_once() {
        let (registry, recorder) = registry(Vec::new(), StubFetch::new());
        let source = StaticSource::new("a", Vec::new());
        let a = id("https://example.com/a.mov");

        assert!(registry.submit_if_new(&a, &a, &source).await.unwrap());
        assert!(!registry.submit_if_new(&a, &a, &source).await.unwrap());
        assert_eq!(recorder.submitted_urls(), vec!["https://example.com/a.mov"]);
    }

    #[tokio::test]
    async fn test_submission_records_original_and_resolved() {
        let (registry, _) = registry(Vec::new(), StubFetch::new());
        let source = StaticSource::new("a", Vec::new());
        let original = id("https://short.example/x");
        let resolved = id("https://cdn.example.com/a.mov");
        registry.submit_if_new(&original, &resolved, &source).await.unwrap();

        assert!(registry.contains(&original, &original, &source).await.unwrap());
        assert!(registry.contains(&resolved, &resolved, &source).await.unwrap());
        let by_name = registry.urls_by_file_name("a.mov").await.unwrap();
        assert_eq!(by_name.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_history_blocks_submission() {
        let (client, recorder) = RecordingManager::unavailable();
        let (handle, _worker) = ManagerHandle::spawn(client);
        let registry = DownloadRegistry::new(handle, Arc::new(StubFetch::new()));
        let source = StaticSource::new("a", Vec::new());
        let a = id("https://example.com/a.mov");

        let error = registry.submit_if_new(&a, &a, &source).await.unwrap_err();
        assert!(matches!(error, RegistryError::Unavailable { .. }));
        assert!(recorder.submitted_urls().is_empty());
    }

    #[tokio::test]
    async fn test_download_url_submits_resolved_form() {
        let fetch = StubFetch::new().with_redirect("https://short.example/x", "https://cdn.example.com/a.mov");
        let (registry, recorder) = registry(Vec::new(), fetch);
        let original = id("https://short.example/x").with_comment("ad hoc");
        let submitted = registry.download_url(&original).await.unwrap();
        assert_eq!(submitted.as_str(), "https://cdn.example.com/a.mov");
        assert_eq!(recorder.submitted_urls(), vec!["https://cdn.example.com/a.mov"]);
        assert_eq!(recorder.submissions()[0].comment.as_deref(), Some("ad hoc"));
        assert_eq!(recorder.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_download_url_falls_back_to_unresolved() {
        let fetch = StubFetch::new().with_failure("https://down.example.com/a.mov");
        let (registry, recorder) = registry(Vec::new(), fetch);
        registry.download_url(&id("https://down.example.com/a.mov")).await.unwrap();
        assert_eq!(recorder.submitted_urls(), vec!["https://down.example.com/a.mov"]);
    }

    // ==================== File-name index ====================

    #[tokio::test]
    async fn test_urls_by_file_name_reads_full_history() {
        let (registry, _) = registry(
            vec![
                HistoryEntry::new("https://a.example.com/1.jpg", "wall.jpg"),
                HistoryEntry::new("https://b.example.com/2.jpg", "other.jpg"),
                HistoryEntry::new("https://c.example.com/3.jpg", "wall.jpg"),
            ],
            StubFetch::new(),
        );
        let urls: Vec<String> = registry
            .urls_by_file_name("wall.jpg")
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(urls, vec!["https://c.example.com/3.jpg", "https://a.example.com/1.jpg"]);
        assert!(registry.urls_by_file_name("none.jpg").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finished_download_reindexes_renamed_file() {
        let (registry, _) = registry(
            vec![HistoryEntry::new("https://old.example.com/a.mov", "a.mov")],
            StubFetch::new(),
        );
        let source = StaticSource::new("a", Vec::new());
        let original = id("https://short.example/x");
        let resolved = id("https://cdn.example.com/a.mov");
        registry.submit_if_new(&original, &resolved, &source).await.unwrap();

        let found = registry
            .finished_download("https://cdn.example.com/a.mov", "a_1.mov")
            .await
            .unwrap();
        assert_eq!(found, vec![original.clone(), resolved.clone()]);
        assert_eq!(registry.urls_by_file_name("a_1.mov").await.unwrap(), vec![original, resolved]);
    }

    #[tokio::test]
    async fn test_finished_download_from_history_prefers_matching_url() {
        let (registry, _) = registry(
            vec![
                HistoryEntry::new("https://a.example.com/wall.jpg", "wall.jpg"),
                HistoryEntry::new("https://b.example.com/wall.jpg", "wall.jpg"),
            ],
            StubFetch::new(),
        );
        let found = registry
            .finished_download("https://b.example.com/wall.jpg", "wall.jpg")
            .await
            .unwrap();
        assert_eq!(found, vec![id("https://b.example.com/wall.jpg")]);

        let unmatched = registry
            .finished_download("https://c.example.com/other.jpg", "wall.jpg")
            .await
            .unwrap();
        assert_eq!(unmatched.len(), 2);
    }
}
