use std::sync::Arc;

use crate::ids::{TaskId, WorkerId};
use crate::task::Task;

/// Argument passed to the `done` callback supplied to [`crate::Scheduler::run`].
///
/// A `Task` variant is delivered once per completion event of that task
/// (success, a retried failure, or a terminal failure) — a task that fails
/// twice before eventually succeeding is reported three times. `Finished` is
/// delivered exactly once, when the run as a whole stops.
#[derive(Debug, Clone)]
pub enum DoneSignal {
    /// `task` just finished an attempt; inspect `task.failed()` /
    /// `task.exception()` for the outcome.
    Task(Arc<dyn Task>),
    /// The run has stopped, successfully or otherwise.
    Finished(Arc<FinishReason>),
}

/// Why a run stopped.
#[derive(Debug)]
pub enum FinishReason {
    /// Every task reached a terminal state and no work remains.
    Completed,
    /// The run was aborted or hit a fatal error.
    Failed(crate::error::ScheduleError),
}

/// A diagnostic event broadcast while a run is in progress.
///
/// Entirely supplementary: nothing in the scheduler's own behavior depends
/// on whether anyone is subscribed.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// `task` was just dispatched to `worker`.
    TaskDispatched {
        /// The dispatched task.
        task: TaskId,
        /// The worker it was dispatched to.
        worker: WorkerId,
    },
    /// `worker` was marked failed and will no longer receive work.
    WorkerMarkedFailed {
        /// The worker that failed.
        worker: WorkerId,
    },
    /// A task's execution future resolved after the task had already been
    /// demoted back to blocked by a cascading failure; its result, success
    /// or not, was discarded.
    StaleCompletionDiscarded {
        /// The task whose completion was discarded.
        task: TaskId,
    },
    /// An abort was requested.
    AbortRequested,
    /// The run's driver loop has exited.
    Stopped,
    /// A non-fatal anomaly worth surfacing to an operator.
    Warning {
        /// Human-readable description.
        message: String,
    },
}

/// A point-in-time view of a run, suitable for a status page or health
/// check. Obtained via [`crate::SchedulerHandle::snapshot`].
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Whether the run has been aborted.
    pub aborted: bool,
    /// Per-worker status.
    pub workers: Vec<WorkerSnapshot>,
    /// Number of tasks that have completed successfully so far.
    pub executed_count: usize,
    /// Number of tasks still blocked, executable, or executing.
    pub pending_count: usize,
}

/// A single worker's status within a [`StatusSnapshot`].
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    /// The worker this entry describes.
    pub worker: WorkerId,
    /// Whether the worker has been marked failed.
    pub failed: bool,
    /// The task currently assigned to this worker, if any.
    pub current_task: Option<TaskId>,
}
