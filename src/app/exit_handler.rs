//! Exit code logic for the automate process.

use automate_core::DownloadEvent;

use crate::ProcessExit;

/// Outcome of an ad hoc `--download` run.
pub(crate) fn exit_for_download(event: &DownloadEvent) -> ProcessExit {
    match event {
        DownloadEvent::Finished { .. } => ProcessExit::Success,
        DownloadEvent::Failed { .. } => ProcessExit::Failure,
    }
}
