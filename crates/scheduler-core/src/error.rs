use crate::ids::TaskId;

/// Everything that can go wrong constructing or running a [`crate::Scheduler`].
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// `Scheduler::new` was called with no tasks.
    #[error("task set must not be empty")]
    EmptyTaskSet,

    /// `Scheduler::new` was called with no workers.
    #[error("worker set must not be empty")]
    NoWorkers,

    /// Two tasks in the same set reported the same id.
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    /// A task's `dependencies()`/`dependents()` named an id absent from the
    /// task set.
    #[error("unknown task id referenced: {0}")]
    UnknownTask(TaskId),

    /// A `SchedulerConfig` field was out of range.
    #[error("invalid scheduler config: {field} must be at least 1")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
    },

    /// After classification no task was immediately executable and none was
    /// already executed either; the task graph has no entry point.
    #[error("no task is executable and none has already executed")]
    NoExecutableTasks,

    /// Every worker is forbidden from running `task` (its locality scores
    /// are all negative).
    #[error("task {task} is forbidden on every worker")]
    AllWorkersForbidden {
        /// The task with no viable worker.
        task: TaskId,
    },

    /// No (task, worker) pairing in the entire run is permitted.
    #[error("no task can run on any worker")]
    NoViableAssignment,

    /// Every worker has failed; the run cannot make further progress.
    #[error("every worker has failed")]
    AllWorkersFailed,

    /// A task exhausted its retry budget.
    #[error("task {task} exhausted its retry budget")]
    RetriesExhausted {
        /// The task that ran out of attempts.
        task: TaskId,
        /// The failure from its final attempt.
        #[source]
        source: anyhow::Error,
    },

    /// An internal bookkeeping invariant was violated. Should never happen;
    /// surfaced instead of panicking so a caller embedding the scheduler in
    /// a long-lived process can recover.
    #[error("scheduler invariant violated: {detail}")]
    InvariantViolation {
        /// Description of the violated invariant.
        detail: String,
    },

    /// The run was aborted via [`crate::SchedulerHandle::abort`] with no
    /// specific cause.
    #[error("scheduler aborted")]
    Aborted,

    /// A worker-affinity or other external error surfaced unchanged.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScheduleError {
    pub(crate) fn invariant(detail: impl Into<String>) -> Self {
        ScheduleError::InvariantViolation { detail: detail.into() }
    }
}
