use std::cmp::Reverse;

use crate::error::ScheduleError;
use crate::ids::{TaskId, WorkerId};
use crate::state::{SchedulerState, TaskStatus};

impl SchedulerState {
    /// Chooses the next task to run on `worker`, preferring locality matches
    /// and lazily pruning stale entries it finds along the way.
    ///
    /// Mirrors spec.md §4.3: first scan `executable_on[worker]` in
    /// descending-score order for a still-executable task, discarding
    /// entries for tasks that have since been serviced elsewhere; if nothing
    /// is found there, fall back to a priority-ordered scan of the global
    /// `executable` set, skipping tasks forbidden on this worker.
    ///
    /// A task named in `executable_on[worker]` that is entirely absent from
    /// `self.tasks` is not a stale entry, it's a consistency violation: every
    /// tracked task must stay registered for its whole lifetime, so this is
    /// reported as a fatal [`ScheduleError::InvariantViolation`] rather than
    /// pruned silently.
    pub(crate) fn select_task(&mut self, worker: &WorkerId) -> Result<Option<TaskId>, ScheduleError> {
        if let Some(prefs) = self.executable_on.get(worker) {
            let mut stale = Vec::new();
            let mut chosen = None;
            let mut missing = None;
            for (score, task_id) in prefs.iter() {
                match self.tasks.get(task_id).map(|e| e.status) {
                    Some(TaskStatus::Executable) => {
                        chosen = Some(task_id.clone());
                        break;
                    }
                    Some(TaskStatus::Blocked) => continue,
                    Some(TaskStatus::Executed | TaskStatus::Executing | TaskStatus::TerminallyFailed) => {
                        stale.push((*score, task_id.clone()));
                    }
                    None => {
                        missing = Some(task_id.clone());
                        break;
                    }
                }
            }
            if let Some(set) = self.executable_on.get_mut(worker) {
                for key in stale {
                    set.remove(&key);
                }
            }
            if let Some(task_id) = missing {
                return Err(ScheduleError::invariant(format!(
                    "task {task_id} present in executable_on[{worker}] but absent from the task registry"
                )));
            }
            if chosen.is_some() {
                return Ok(chosen);
            }
        }

        Ok(self
            .executable
            .iter()
            .find(|(_, id)| !self.forbidden.get(id).map(|f| f.contains(worker)).unwrap_or(false))
            .map(|(_, id)| id.clone()))
    }

    /// Returns the next worker from `workers_ready`, silently discarding
    /// entries for workers that have since been marked failed.
    pub(crate) fn next_ready_worker(&mut self) -> Option<WorkerId> {
        while let Some(worker) = self.workers_ready.pop_front() {
            if !self.workers_failed.contains(&worker) {
                return Some(worker);
            }
        }
        None
    }

    /// Removes `task` from the global executable set and from `worker`'s
    /// preference queue; called at the moment a task is dispatched. Other
    /// workers' preference queues may still reference `task` and are pruned
    /// lazily by `select_task`.
    pub(crate) fn remove_dispatched(&mut self, worker: &WorkerId, task: &TaskId) {
        if let Some(priority) = self.tasks.get(task).map(|e| e.task.priority()) {
            self.executable.remove(&(priority, task.clone()));
        }
        if let Some(score) = self.locality.get(worker).and_then(|m| m.get(task)).copied() {
            if let Some(set) = self.executable_on.get_mut(worker) {
                set.remove(&(Reverse(score), task.clone()));
            }
        }
    }

    /// Marks `worker` failed: it is removed from consideration for future
    /// assignment but any task it is mid-flight on keeps running until that
    /// future resolves.
    pub(crate) fn fail_worker(&mut self, worker: &WorkerId) {
        self.workers_failed.insert(worker.clone());
        self.workers_idle.remove(worker);
    }
}
