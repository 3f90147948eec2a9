//! Routes finished downloads back to the sources that may own them.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::identifier::Identifier;
use crate::manager::DownloadEvent;
use crate::registry::DownloadRegistry;
use crate::scheduler::StopSignal;
use crate::source::Source;

/// Dispatches [`DownloadEvent`]s to [`Source::download_finished`].
pub struct CompletionRouter {
    registry: Arc<DownloadRegistry>,
    sources: Vec<Arc<dyn Source>>,
}

impl CompletionRouter {
    #[must_use]
    pub fn new(registry: Arc<DownloadRegistry>, sources: Vec<Arc<dyn Source>>) -> Self {
        Self { registry, sources }
    }

    /// Consumes events until the channel closes or `stop` is set.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<DownloadEvent>, stop: StopSignal) {
        loop {
            let event = tokio::select! {
                biased;
                () = stop.stopped() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            self.route(&event).await;
        }
    }

    /// Handles one event.
    pub async fn route(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Finished { url, path } => {
                let identifiers = self.identifiers_for(url, path).await;
                if identifiers.is_empty() {
                    return;
                }
                for source in &self.sources {
                    source.download_finished(&identifiers, path).await;
                }
            }
            DownloadEvent::Failed { url, error } => {
                debug!(url = %url, error = %error, "Download failed; will retry next cycle");
            }
        }
    }

    async fn identifiers_for(&self, url: &str, path: &Path) -> Vec<Identifier> {
        let by_name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => match self.registry.finished_download(url, name).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to look up finished download");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        if !by_name.is_empty() {
            return by_name;
        }

        match Identifier::parse(url) {
            Ok(identifier) => vec![identifier],
            Err(e) => {
                warn!(url = %url, error = %e, "Finished download has no usable URL");
                Vec::new()
            }
        }
    }
}
