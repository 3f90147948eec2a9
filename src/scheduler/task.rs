//! Poll loop for a single task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info, info_span};

use super::stop::{StopSignal, Stopper, stop_channel};

/// Default pause between cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(900);

/// A unit of periodic work.
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique, human-readable name used for selection and logging.
    fn name(&self) -> &str;

    /// Runs one cycle. Implementations check `stop` between items and
    /// return early once it is set.
    async fn process(&self, stop: &StopSignal);
}

/// Lifecycle of a task runner.
///
/// `Created → Running → (Polling ⇄ Sleeping)* → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Polling,
    Sleeping,
    Stopped,
}

impl TaskState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Polling => "polling",
            Self::Sleeping => "sleeping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task that has not been started yet.
pub struct TaskRunner {
    task: Arc<dyn Task>,
    interval: Duration,
    state: watch::Sender<TaskState>,
    stopper: Stopper,
    signal: StopSignal,
}

impl TaskRunner {
    #[must_use]
    pub fn new(task: Arc<dyn Task>, interval: Duration) -> Self {
        let (state, _) = watch::channel(TaskState::Created);
        let (stopper, signal) = stop_channel();
        Self {
            task,
            interval,
            state,
            stopper,
            signal,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.task.name()
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Returns a stopper for this task, usable before it starts.
    #[must_use]
    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    /// Spawns the poll loop on the current runtime.
    #[must_use]
    pub fn start(self) -> TaskHandle {
        let name = self.task.name().to_string();
        let state = self.state.subscribe();
        let span = info_span!("task", name = %name);
        let join = tokio::spawn(
            poll_loop(self.task, self.interval, self.state, self.signal).instrument(span),
        );
        TaskHandle {
            name,
            stopper: self.stopper,
            state,
            join,
        }
    }
}

async fn poll_loop(
    task: Arc<dyn Task>,
    interval: Duration,
    state: watch::Sender<TaskState>,
    stop: StopSignal,
) {
    state.send_replace(TaskState::Running);
    info!("Start");

    while !stop.is_stopped() {
        state.send_replace(TaskState::Polling);
        debug!("Resume");
        task.process(&stop).await;
        if stop.is_stopped() {
            break;
        }

        state.send_replace(TaskState::Sleeping);
        debug!(interval_secs = interval.as_secs(), "Pause");
        if stop.wait(interval).await {
            break;
        }
    }

    state.send_replace(TaskState::Stopped);
    info!("Stop");
}

/// A running task.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    stopper: Stopper,
    state: watch::Receiver<TaskState>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Requests a stop. The current item finishes first.
    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// Waits until the task reaches `target`.
    ///
    /// Returns `false` if the loop ended without reaching it.
    pub async fn wait_for_state(&self, target: TaskState) -> bool {
        let mut state = self.state.clone();
        state.wait_for(|current| *current == target).await.is_ok()
    }

    /// Waits for the loop to finish.
    ///
    /// # Errors
    ///
    /// Returns the join error if the loop panicked or was aborted.
    pub async fn join(self) -> Result<(), JoinError> {
        self.join.await
    }

    pub(crate) fn into_parts(self) -> (String, JoinHandle<()>) {
        (self.name, self.join)
    }
}
