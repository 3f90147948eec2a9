//! Cooperative stop signalling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Requests a stop. Cloneable; every clone controls the same signal.
#[derive(Debug, Clone)]
pub struct Stopper {
    sender: Arc<watch::Sender<bool>>,
}

impl Stopper {
    pub fn stop(&self) {
        self.sender.send_replace(true);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Observes a stop request.
#[derive(Debug, Clone)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once a stop is requested.
    ///
    /// Never completes if every [`Stopper`] was dropped without stopping.
    pub async fn stopped(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleeps for `duration` unless a stop arrives first.
    ///
    /// Returns `true` when stopped.
    pub async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.stopped() => true,
            () = tokio::time::sleep(duration) => self.is_stopped(),
        }
    }
}

/// Creates a linked stopper and signal.
#[must_use]
pub fn stop_channel() -> (Stopper, StopSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        Stopper {
            sender: Arc::new(sender),
        },
        StopSignal { receiver },
    )
}
