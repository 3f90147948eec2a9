//! Periodic task scheduling with cooperative, bounded shutdown.

mod download;
mod stop;
mod task;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub use download::{CycleReport, DownloadTask};
pub use stop::{StopSignal, Stopper, stop_channel};
pub use task::{DEFAULT_POLL_INTERVAL, Task, TaskHandle, TaskRunner, TaskState};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown task `{name}` (available: {available})")]
    UnknownTask { name: String, available: String },
}

/// A task paired with its poll interval, not yet running.
#[derive(Clone)]
pub struct ScheduledTask {
    pub task: Arc<dyn Task>,
    pub interval: Duration,
}

impl ScheduledTask {
    #[must_use]
    pub fn new(task: Arc<dyn Task>, interval: Duration) -> Self {
        Self { task, interval }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.task.name()
    }
}

/// Checks that every requested name is among `available`.
///
/// # Errors
///
/// Returns [`SchedulerError::UnknownTask`] for the first unknown name.
pub fn check_task_names(available: &[&str], requested: &[String]) -> Result<(), SchedulerError> {
    match requested.iter().find(|name| !available.contains(&name.as_str())) {
        Some(name) => Err(SchedulerError::UnknownTask {
            name: name.clone(),
            available: available.join(", "),
        }),
        None => Ok(()),
    }
}

/// Keeps only the tasks named in `names`, in the order given.
///
/// An empty `names` keeps everything.
///
/// # Errors
///
/// Returns [`SchedulerError::UnknownTask`] for the first name that matches
/// no task.
pub fn select_tasks(
    tasks: Vec<ScheduledTask>,
    names: &[String],
) -> Result<Vec<ScheduledTask>, SchedulerError> {
    if names.is_empty() {
        return Ok(tasks);
    }
    let available: Vec<&str> = tasks.iter().map(ScheduledTask::name).collect();
    check_task_names(&available, names)?;

    let mut selected: Vec<ScheduledTask> = Vec::with_capacity(names.len());
    for name in names {
        if selected.iter().any(|t| t.name() == name) {
            continue;
        }
        if let Some(task) = tasks.iter().find(|t| t.name() == name) {
            selected.push(task.clone());
        }
    }
    Ok(selected)
}

/// Running tasks.
#[derive(Debug, Default)]
pub struct Scheduler {
    handles: Vec<TaskHandle>,
}

impl Scheduler {
    /// Starts every task on its own tokio task.
    #[must_use]
    pub fn start(tasks: Vec<ScheduledTask>) -> Self {
        let handles = tasks
            .into_iter()
            .map(|t| TaskRunner::new(t.task, t.interval).start())
            .collect();
        Self { handles }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    #[must_use]
    pub fn states(&self) -> Vec<(String, TaskState)> {
        self.handles
            .iter()
            .map(|h| (h.name().to_string(), h.state()))
            .collect()
    }

    pub fn stop_all(&self) {
        info!(tasks = self.handles.len(), "Stopping tasks");
        for handle in &self.handles {
            handle.stop();
        }
    }

    /// Waits for every task to finish, aborting those still running after
    /// `grace`. Returns the number of aborted tasks.
    pub async fn join_all(self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        let mut aborted = 0;

        for handle in self.handles {
            let (name, mut join) = handle.into_parts();
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task = %name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    warn!(task = %name, "Task did not stop in time; aborting");
                    join.abort();
                    aborted += 1;
                }
            }
        }
        aborted
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Task for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn process(&self, _stop: &StopSignal) {}
    }

    /// Ignores stop requests while processing.
    struct Stubborn;

    #[async_trait]
    impl Task for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        async fn process(&self, _stop: &StopSignal) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    fn tasks(names: &[&'static str]) -> Vec<ScheduledTask> {
        names
            .iter()
            .map(|n| ScheduledTask::new(Arc::new(Named(n)), DEFAULT_POLL_INTERVAL))
            .collect()
    }

    fn names(selected: &[ScheduledTask]) -> Vec<&str> {
        selected.iter().map(ScheduledTask::name).collect()
    }

    // ==================== Selection ====================

    #[test]
    fn test_select_without_names_keeps_all() {
        let selected = select_tasks(tasks(&["a", "b"]), &[]).unwrap();
        assert_eq!(names(&selected), vec!["a", "b"]);
    }

    #[test]
    fn test_select_keeps_requested_order_and_dedups() {
        let requested = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let selected = select_tasks(tasks(&["a", "b", "c"]), &requested).unwrap();
        assert_eq!(names(&selected), vec!["b", "a"]);
    }

    #[test]
    fn test_check_task_names_accepts_known_names() {
        assert!(check_task_names(&["a", "b"], &["b".to_string()]).is_ok());
        assert!(check_task_names(&["a"], &[]).is_ok());
    }

    #[test]
    fn test_select_unknown_task_lists_available() {
        let requested = vec!["nope".to_string()];
        let error = select_tasks(tasks(&["a", "b"]), &requested).err().unwrap();
        assert_eq!(error.to_string(), "unknown task `nope` (available: a, b)");
    }

    // ==================== Lifecycle ====================

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_stops_every_task() {
        let scheduler = Scheduler::start(tasks(&["a", "b"]));
        assert_eq!(scheduler.len(), 2);
        for handle in &scheduler.handles {
            assert!(handle.wait_for_state(TaskState::Sleeping).await);
        }

        scheduler.stop_all();
        let aborted = scheduler.join_all(Duration::from_secs(5)).await;
        assert_eq!(aborted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_all_aborts_tasks_past_grace() {
        let scheduler = Scheduler::start(vec![
            ScheduledTask::new(Arc::new(Stubborn), DEFAULT_POLL_INTERVAL),
            ScheduledTask::new(Arc::new(Named("quick")), DEFAULT_POLL_INTERVAL),
        ]);
        scheduler.handles[0].wait_for_state(TaskState::Polling).await;

        scheduler.stop_all();
        let started = Instant::now();
        let aborted = scheduler.join_all(Duration::from_secs(5)).await;

        assert_eq!(aborted, 1);
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_empty_scheduler_joins_immediately() {
        let scheduler = Scheduler::start(Vec::new());
        assert!(scheduler.is_empty());
        assert!(scheduler.states().is_empty());
        assert_eq!(scheduler.join_all(Duration::from_secs(1)).await, 0);
    }
}
