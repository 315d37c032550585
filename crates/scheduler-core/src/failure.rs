use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::ScheduleError;
use crate::ids::TaskId;
use crate::state::{SchedulerState, TaskStatus};
use crate::task::TaskFailure;

/// Result of running a task's failure through the resolver.
pub(crate) struct FailureOutcome {
    /// Set if the whole run must stop: either this task exhausted its
    /// retries, named an unknown dependency, or the failure left every
    /// worker marked failed.
    pub(crate) terminal: Option<ScheduleError>,
    /// Workers newly marked failed during this resolution, for the caller to
    /// report as [`crate::event::SchedulerEvent::WorkerMarkedFailed`].
    pub(crate) newly_failed_workers: Vec<crate::ids::WorkerId>,
    /// Non-fatal anomalies surfaced during this resolution, for the caller to
    /// report as [`crate::event::SchedulerEvent::Warning`].
    pub(crate) warnings: Vec<String>,
}

impl SchedulerState {
    /// Resolves a task failure, cascading through dependents and upstream
    /// dependencies as needed.
    ///
    /// spec.md §9 calls for this to run under a reentrant lock via plain
    /// recursion; `std::sync::Mutex` is not reentrant, so this flattens the
    /// recursion into an explicit worklist instead. Each iteration processes
    /// exactly what one recursive call to the original `task_failed(task)`
    /// would have.
    pub(crate) fn resolve_failure(&mut self, task: TaskId, cause: TaskFailure) -> FailureOutcome {
        let mut worklist: VecDeque<(TaskId, TaskFailure)> = VecDeque::new();
        worklist.push_back((task, cause));
        let mut terminal: Option<ScheduleError> = None;
        let mut newly_failed_workers: Vec<crate::ids::WorkerId> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        while let Some((tid, cause)) = worklist.pop_front() {
            let entry = match self.tasks.get(&tid) {
                Some(e) => e,
                None => {
                    terminal.get_or_insert(ScheduleError::UnknownTask(tid));
                    continue;
                }
            };
            let already_rescheduled = matches!(entry.status, TaskStatus::Executable | TaskStatus::Executing)
                || !entry.blocked_on.is_empty();
            if already_rescheduled {
                continue;
            }

            self.executed.remove(&tid);
            self.mark_dependents_blocked(&tid);

            let mut skip_final_check = false;
            match cause {
                TaskFailure::DependenciesFailed { by_worker } => {
                    for (worker, dep_ids) in by_worker {
                        for dep_id in dep_ids {
                            let Some(dep_entry) = self.tasks.get(&dep_id) else {
                                terminal.get_or_insert(ScheduleError::UnknownTask(dep_id));
                                continue;
                            };
                            let last = dep_entry.task.executed_on_last();
                            let report_applies = match &worker {
                                None => true,
                                Some(w) => last.as_ref() == Some(w),
                            };
                            if !report_applies {
                                tracing::debug!(task = %dep_id, "stale dependency-failure report ignored");
                                warnings.push(format!(
                                    "dependency-failure report for {dep_id} named a worker that did not \
                                     produce its last result; ignored as stale"
                                ));
                                continue;
                            }
                            let synthesized = TaskFailure::FailedDependency {
                                cause: format!("invalidated by failure of {tid}"),
                            };
                            dep_entry.task.mark_failed(synthesized.clone());
                            worklist.push_back((dep_id, synthesized));
                        }
                    }
                }
                TaskFailure::FailedDependency { .. } | TaskFailure::NotConnected => {
                    if let Some(worker) = self.tasks.get(&tid).and_then(|e| e.task.executed_on_last()) {
                        if !self.workers_failed.contains(&worker) {
                            newly_failed_workers.push(worker.clone());
                        }
                        self.fail_worker(&worker);
                    }
                }
                TaskFailure::Other(err) => {
                    let count = {
                        let counter = self.attempt_failures.entry(tid.clone()).or_insert(0);
                        *counter += 1;
                        *counter
                    };
                    if count >= self.attempts {
                        if let Some(entry) = self.tasks.get_mut(&tid) {
                            entry.status = TaskStatus::TerminallyFailed;
                        }
                        let source = Arc::try_unwrap(err).unwrap_or_else(|shared| anyhow::anyhow!(shared.to_string()));
                        terminal.get_or_insert(ScheduleError::RetriesExhausted { task: tid.clone(), source });
                        skip_final_check = true;
                    }
                }
            }

            if !skip_final_check {
                let can_reschedule = self
                    .tasks
                    .get(&tid)
                    .map(|e| {
                        !matches!(e.status, TaskStatus::Executable | TaskStatus::Executing) && e.blocked_on.is_empty()
                    })
                    .unwrap_or(false);
                if can_reschedule {
                    if let Err(err) = self.set_executable(&tid) {
                        terminal.get_or_insert(err);
                    }
                }
            }
        }

        if terminal.is_none() && self.all_workers_failed() {
            terminal = Some(ScheduleError::AllWorkersFailed);
        }

        FailureOutcome { terminal, newly_failed_workers, warnings }
    }
}
