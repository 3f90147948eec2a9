//! Polls a source and feeds every discovered identifier through deduplication.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, error, warn};

use super::stop::StopSignal;
use super::task::Task;
use crate::dedup::{DedupEngine, Outcome};
use crate::source::Source;

/// Tally of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub submitted: usize,
    pub known: usize,
    /// Items skipped after an error, each logged.
    pub failed: usize,
    /// `false` when the cycle was cut short by a stop request or an
    /// unavailable registry.
    pub completed: bool,
}

/// Task wrapping one [`Source`].
pub struct DownloadTask {
    source: Arc<dyn Source>,
    engine: DedupEngine,
}

impl DownloadTask {
    #[must_use]
    pub fn new(source: Arc<dyn Source>, engine: DedupEngine) -> Self {
        Self { source, engine }
    }

    #[must_use]
    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    /// Lists the source once and processes each item in order.
    ///
    /// Per-item failures are logged and counted; the stop signal is checked
    /// between items.
    pub async fn run_cycle(&self, stop: &StopSignal) -> CycleReport {
        let mut items = self.source.list();
        let mut report = CycleReport::default();

        loop {
            let next = tokio::select! {
                biased;
                () = stop.stopped() => {
                    debug!("Stop requested; abandoning cycle");
                    return report;
                }
                next = items.next() => next,
            };
            let Some(identifier) = next else { break };

            match self.engine.process(self.source.as_ref(), &identifier).await {
                Ok(Outcome::Submitted) => report.submitted += 1,
                Ok(Outcome::AlreadyKnown) => report.known += 1,
                Err(e) if e.aborts_cycle() => {
                    warn!(error = %e, "Download registry unavailable; skipping rest of cycle");
                    return report;
                }
                Err(e) => {
                    report.failed += 1;
                    error!(source = self.source.name(), url = %identifier, error = %e, "Failed to process download");
                }
            }
        }

        report.completed = true;
        report
    }
}

#[async_trait]
impl Task for DownloadTask {
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn process(&self, stop: &StopSignal) {
        let report = self.run_cycle(stop).await;
        debug!(
            submitted = report.submitted,
            known = report.known,
            failed = report.failed,
            completed = report.completed,
            "Cycle complete"
        );
    }
}
