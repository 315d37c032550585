use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::ids::{Priority, TaskId, WorkerId};

/// A future returned by [`Task::execute`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Why a task's last attempt did not produce a usable result.
///
/// Carried on the task itself (`Task::exception`) rather than threaded
/// through call signatures, mirroring how a remote worker reports failure
/// out-of-band from the call that dispatched the work.
#[derive(Debug, Clone)]
pub enum TaskFailure {
    /// The worker that was executing the task dropped its connection
    /// mid-flight; nothing is known about the task's dependencies.
    NotConnected,
    /// The task observed that one or more of its upstream dependencies had
    /// produced a result that is no longer valid, grouped by the worker the
    /// report applies to (`None` means "regardless of which worker produced
    /// it").
    DependenciesFailed {
        /// Dependency ids the failure applies to, keyed by the worker whose
        /// materialized result is implicated.
        by_worker: std::collections::HashMap<Option<WorkerId>, HashSet<TaskId>>,
    },
    /// A task failed purely because an upstream dependency was invalidated;
    /// synthesized by the failure resolver, never reported by a `Task` impl
    /// directly.
    FailedDependency {
        /// Human-readable description of which dependency caused this.
        cause: String,
    },
    /// Any other failure; counted against the task's retry budget.
    Other(Arc<anyhow::Error>),
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::NotConnected => write!(f, "worker disconnected"),
            TaskFailure::DependenciesFailed { by_worker } => {
                write!(f, "dependencies invalidated on {} worker(s)", by_worker.len())
            }
            TaskFailure::FailedDependency { cause } => write!(f, "failed dependency: {cause}"),
            TaskFailure::Other(err) => write!(f, "{err}"),
        }
    }
}

/// A unit of work the scheduler drives to completion on some worker.
///
/// Implementations are supplied by the caller; the scheduler only ever holds
/// `Arc<dyn Task>` and never assumes anything about what `execute` actually
/// does beyond its return value and the state observable through the other
/// methods once the returned future resolves.
pub trait Task: Send + Sync + fmt::Debug {
    /// Stable identifier, unique within a single scheduler run.
    fn id(&self) -> TaskId;

    /// Scheduling priority; lower values are preferred when multiple tasks
    /// are otherwise equally eligible.
    fn priority(&self) -> Priority;

    /// Ids of tasks that must execute successfully before this one can run.
    fn dependencies(&self) -> HashSet<TaskId> {
        HashSet::new()
    }

    /// Ids of tasks that depend on this one. Expected to be the inverse of
    /// every other task's `dependencies()` within the same task set.
    fn dependents(&self) -> HashSet<TaskId> {
        HashSet::new()
    }

    /// If set, the task is considered already executed on this worker before
    /// the scheduler does anything, e.g. because it was restored from a
    /// previous run.
    fn stopped_on(&self) -> Option<WorkerId> {
        None
    }

    /// Worker the most recent attempt ran on, if any.
    fn executed_on_last(&self) -> Option<WorkerId> {
        None
    }

    /// Every worker this task has ever executed on, oldest first.
    fn executed_on(&self) -> Vec<WorkerId> {
        Vec::new()
    }

    /// Whether the most recent attempt failed.
    fn failed(&self) -> bool;

    /// Failure detail for the most recent attempt, if `failed()` is true.
    fn exception(&self) -> Option<TaskFailure> {
        None
    }

    /// Records a failure against this task, e.g. because a downstream
    /// consumer reported that the task's result is stale. Implementations
    /// must make this observable from a subsequent `failed()`/`exception()`
    /// call.
    fn mark_failed(&self, failure: TaskFailure);

    /// Best-effort cooperative cancellation; called on tasks still executing
    /// when the scheduler aborts. Default is a no-op since not every task
    /// can be interrupted mid-flight.
    fn cancel(&self) {}

    /// Runs the task on `worker`. Must return promptly with a future rather
    /// than blocking inline; the scheduler calls this from inside a
    /// synchronous critical section and immediately hands the returned
    /// future to its own task runtime.
    fn execute(&self, worker: WorkerId) -> BoxFuture<'static, ()>;

    /// Scores this task's affinity for each of `workers`. Positive scores
    /// indicate a preference (higher is stronger), negative scores forbid
    /// the pairing outright, and zero (the default, via an absent entry)
    /// means indifferent.
    fn locality(&self, _workers: &[WorkerId]) -> Vec<(WorkerId, i64)> {
        Vec::new()
    }
}
