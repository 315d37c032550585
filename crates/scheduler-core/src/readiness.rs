use std::cmp::Reverse;

use crate::error::ScheduleError;
use crate::ids::TaskId;
use crate::state::{SchedulerState, TaskStatus};

impl SchedulerState {
    /// Marks `id` eligible to run on any worker that does not forbid it.
    ///
    /// Called when a task first becomes unblocked or when a previously
    /// failed task must be rescheduled. Idempotent: no-ops if the task is
    /// already executable or executing. Defensively clears any stale
    /// `executed` membership, since a reschedule only ever happens after the
    /// caller has demoted the task out of that state.
    pub(crate) fn set_executable(&mut self, id: &TaskId) -> Result<(), ScheduleError> {
        let priority = {
            let entry = self
                .tasks
                .get(id)
                .ok_or_else(|| ScheduleError::UnknownTask(id.clone()))?;
            if matches!(entry.status, TaskStatus::Executable | TaskStatus::Executing) {
                return Ok(());
            }
            entry.task.priority()
        };

        self.executed.remove(id);

        // Sorted rather than taken straight from the `HashMap`'s own
        // iteration order so that which idle worker gets woken first for a
        // given task is reproducible from run to run.
        let mut worker_ids: Vec<_> = self.workers.keys().cloned().collect();
        worker_ids.sort();
        if worker_ids.is_empty() {
            return Err(ScheduleError::invariant("set_executable called with no workers registered"));
        }

        let forbidden_for_task = self.forbidden.get(id).cloned().unwrap_or_default();
        if worker_ids.iter().all(|w| forbidden_for_task.contains(w)) {
            return Err(ScheduleError::AllWorkersForbidden { task: id.clone() });
        }

        // Workers with a declared preference for `id` are woken (and so get
        // a ready slot) ahead of indifferent ones: the assignment engine's
        // fallback scan (assignment.rs::select_task) picks the
        // lowest-priority executable task without regard to any other
        // worker's preference, so a preferring worker must reach the ready
        // queue first or a later, indifferent worker could claim the task
        // out from under it.
        let mut preferred_wakeups = Vec::new();
        let mut other_wakeups = Vec::new();
        for worker_id in &worker_ids {
            if self.workers_failed.contains(worker_id) || forbidden_for_task.contains(worker_id) {
                continue;
            }
            let score = self.locality.get(worker_id).and_then(|m| m.get(id)).copied();
            if let Some(score) = score {
                self.executable_on
                    .entry(worker_id.clone())
                    .or_default()
                    .insert((Reverse(score), id.clone()));
            }
            if self.workers_idle.remove(worker_id) {
                if score.is_some() {
                    preferred_wakeups.push(worker_id.clone());
                } else {
                    other_wakeups.push(worker_id.clone());
                }
            }
        }

        for worker_id in preferred_wakeups.into_iter().chain(other_wakeups) {
            for _ in 0..self.concurrency {
                self.workers_ready.push_back(worker_id.clone());
            }
        }

        self.executable.insert((priority, id.clone()));
        if let Some(entry) = self.tasks.get_mut(id) {
            entry.status = TaskStatus::Executable;
        }
        Ok(())
    }

    /// Demotes a dependent back to blocked because one of its dependencies
    /// is being redone. Handles the `Executed` and `Executable` cases
    /// directly; an `Executing` dependent is left running and is demoted by
    /// the completion handler instead once its stale result comes back
    /// (see `scheduler.rs::on_task_complete`).
    pub(crate) fn mark_dependents_blocked(&mut self, failed: &TaskId) {
        let dependents = match self.tasks.get(failed) {
            Some(entry) => entry.dependents.clone(),
            None => return,
        };

        for dep in dependents {
            let status = match self.tasks.get(&dep) {
                Some(entry) => entry.status,
                None => continue,
            };

            if let Some(entry) = self.tasks.get_mut(&dep) {
                entry.blocked_on.insert(failed.clone());
            }

            match status {
                TaskStatus::Executed => {
                    self.executed.remove(&dep);
                    if let Some(entry) = self.tasks.get_mut(&dep) {
                        entry.status = TaskStatus::Blocked;
                    }
                }
                TaskStatus::Executable => {
                    if let Some(priority) = self.tasks.get(&dep).map(|e| e.task.priority()) {
                        self.executable.remove(&(priority, dep.clone()));
                    }
                    if let Some(entry) = self.tasks.get_mut(&dep) {
                        entry.status = TaskStatus::Blocked;
                    }
                }
                TaskStatus::Executing | TaskStatus::Blocked | TaskStatus::TerminallyFailed => {}
            }
        }
    }
}
