//! Deduplication engine: the one place where source equality meets registry state.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::fetch::{Fetch, NetworkError};
use crate::identifier::Identifier;
use crate::registry::{DownloadRegistry, RegistryError};
use crate::source::Source;

/// What happened to one discovered identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handed to the download manager.
    Submitted,
    /// Already downloaded or queued.
    AlreadyKnown,
}

/// Errors from processing one discovered identifier.
#[derive(Debug, Error)]
pub enum DedupError {
    /// Redirect resolution failed; the item is skipped this cycle.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The registry could not answer or the manager refused the download.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DedupError {
    /// Returns `true` when the rest of the cycle cannot be deduplicated either.
    #[must_use]
    pub fn aborts_cycle(&self) -> bool {
        matches!(self, Self::Registry(RegistryError::Unavailable { .. }))
    }
}

/// Decides, per discovered identifier, whether to submit it.
#[derive(Clone)]
pub struct DedupEngine {
    registry: Arc<DownloadRegistry>,
    fetch: Arc<dyn Fetch>,
}

impl std::fmt::Debug for DedupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupEngine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl DedupEngine {
    #[must_use]
    pub fn new(registry: Arc<DownloadRegistry>, fetch: Arc<dyn Fetch>) -> Self {
        Self { registry, fetch }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<DownloadRegistry> {
        &self.registry
    }

    /// Resolves `identifier`, then submits it unless the registry already
    /// knows it under `source`'s equality.
    ///
    /// Resolution happens before the registry lock is taken; the check and
    /// the submission happen under it.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::Network`] when resolution fails and
    /// [`DedupError::Registry`] when the registry or manager fails.
    #[instrument(skip(self, source, identifier), fields(source = source.name(), url = %identifier))]
    pub async fn process(
        &self,
        source: &dyn Source,
        identifier: &Identifier,
    ) -> Result<Outcome, DedupError> {
        let resolved = identifier.resolve(self.fetch.as_ref()).await?;
        if resolved != *identifier {
            debug!(redirect = %resolved, "Redirect");
        }

        if self
            .registry
            .submit_if_new(identifier, &resolved, source)
            .await?
        {
            info!(url = %resolved, "Download");
            source.download_submitted(identifier, &resolved);
            Ok(Outcome::Submitted)
        } else {
            debug!("Already downloaded");
            Ok(Outcome::AlreadyKnown)
        }
    }
}
