use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::ids::{Priority, TaskId, WorkerId};
use crate::task::Task;
use crate::worker::Worker;

/// Which of the five mutually-exclusive states a task is in (spec.md §3,
/// invariant I1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    Blocked,
    Executable,
    Executing,
    Executed,
    TerminallyFailed,
}

pub(crate) struct TaskEntry {
    pub(crate) task: Arc<dyn Task>,
    pub(crate) status: TaskStatus,
    /// Dependency ids not yet satisfied. Non-empty iff `status == Blocked`.
    pub(crate) blocked_on: HashSet<TaskId>,
    /// Cached `task.dependents()`, computed once at classification.
    pub(crate) dependents: HashSet<TaskId>,
}

/// All mutable scheduling state, behind a single non-reentrant mutex in
/// [`crate::scheduler::Scheduler`]. Methods are split across `readiness.rs`,
/// `assignment.rs`, and `failure.rs` by role; none of them ever recurse back
/// into the mutex (see `failure.rs` for the explicit worklist this implies).
pub(crate) struct SchedulerState {
    pub(crate) tasks: HashMap<TaskId, TaskEntry>,
    pub(crate) executable: BTreeSet<(Priority, TaskId)>,
    pub(crate) executing: HashSet<TaskId>,
    pub(crate) executed: HashSet<TaskId>,
    /// Attempt counts for `TaskFailure::Other`, keyed by task.
    pub(crate) attempt_failures: HashMap<TaskId, u32>,

    pub(crate) workers: HashMap<WorkerId, Arc<dyn Worker>>,
    pub(crate) workers_ready: VecDeque<WorkerId>,
    pub(crate) workers_idle: HashSet<WorkerId>,
    pub(crate) workers_failed: HashSet<WorkerId>,
    /// Task the worker currently has in flight, for snapshotting.
    pub(crate) current_assignment: HashMap<WorkerId, TaskId>,

    /// Positive locality scores, `locality[worker][task]`. Computed once at
    /// classification and never recomputed.
    pub(crate) locality: HashMap<WorkerId, HashMap<TaskId, i64>>,
    /// Workers a task may never run on (negative locality scores).
    pub(crate) forbidden: HashMap<TaskId, HashSet<WorkerId>>,
    /// Per-worker preference queues: tasks with positive locality for that
    /// worker, ordered by descending score then task id.
    pub(crate) executable_on: HashMap<WorkerId, BTreeSet<(Reverse<i64>, TaskId)>>,

    pub(crate) concurrency: usize,
    pub(crate) attempts: u32,
}

impl SchedulerState {
    pub(crate) fn all_workers_failed(&self) -> bool {
        !self.workers.is_empty() && self.workers.keys().all(|w| self.workers_failed.contains(w))
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.executable.is_empty() && self.executing.is_empty()
    }
}
