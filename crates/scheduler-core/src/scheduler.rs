use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinSet;

use crate::config::SchedulerConfig;
use crate::error::ScheduleError;
use crate::event::{DoneSignal, FinishReason, SchedulerEvent, StatusSnapshot, WorkerSnapshot};
use crate::ids::{TaskId, WorkerId};
use crate::state::{SchedulerState, TaskEntry, TaskStatus};
use crate::task::{Task, TaskFailure};
use crate::worker::Worker;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A function invoked once per task completion event and once when the run
/// finishes. See [`DoneSignal`].
pub type DoneCallback = Box<dyn Fn(DoneSignal) + Send + Sync>;

/// A constructed, not-yet-running scheduler.
///
/// Built by [`Scheduler::new`], which validates the task/worker sets and
/// performs the one-time classification pass (spec.md §4.1). Call
/// [`Scheduler::run`] to hand it a `done` callback and start the driver loop.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    notify: Notify,
    abort_requested: AtomicBool,
    fatal: Mutex<Option<ScheduleError>>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    snapshot_tx: watch::Sender<StatusSnapshot>,
    #[allow(dead_code)]
    config: SchedulerConfig,
}

impl Scheduler {
    /// Validates `tasks` and `workers`, computes locality/forbidden sets,
    /// and classifies every task as blocked, executable, or already executed
    /// (via `Task::stopped_on`).
    ///
    /// Fails fast (spec.md §4.1) if: the task or worker set is empty, two
    /// tasks share an id, a task names an unknown dependency, no task ends
    /// up executable while none is already executed, or no (task, worker)
    /// pairing is permitted anywhere in the set.
    pub fn new(
        tasks: Vec<Arc<dyn Task>>,
        workers: Vec<Arc<dyn Worker>>,
        config: SchedulerConfig,
    ) -> Result<Self, ScheduleError> {
        if tasks.is_empty() {
            return Err(ScheduleError::EmptyTaskSet);
        }
        if workers.is_empty() {
            return Err(ScheduleError::NoWorkers);
        }
        let config = config.normalize()?;

        let worker_ids: Vec<WorkerId> = workers.iter().map(|w| w.name().clone()).collect();
        let mut worker_map = HashMap::new();
        for w in workers {
            worker_map.insert(w.name().clone(), w);
        }

        let mut task_map: HashMap<TaskId, TaskEntry> = HashMap::new();
        for task in &tasks {
            let id = task.id();
            if task_map.contains_key(&id) {
                return Err(ScheduleError::DuplicateTaskId(id));
            }
            task_map.insert(
                id,
                TaskEntry {
                    task: task.clone(),
                    status: TaskStatus::Blocked,
                    blocked_on: HashSet::new(),
                    dependents: task.dependents(),
                },
            );
        }
        for entry in task_map.values() {
            for dep in entry.task.dependencies() {
                if !task_map.contains_key(&dep) {
                    return Err(ScheduleError::UnknownTask(dep));
                }
            }
            for dependent in &entry.dependents {
                if !task_map.contains_key(dependent) {
                    return Err(ScheduleError::UnknownTask(dependent.clone()));
                }
            }
        }

        let mut locality: HashMap<WorkerId, HashMap<TaskId, i64>> = HashMap::new();
        let mut forbidden: HashMap<TaskId, HashSet<WorkerId>> = HashMap::new();
        for entry in task_map.values() {
            for (worker_id, score) in entry.task.locality(&worker_ids) {
                if score > 0 {
                    locality.entry(worker_id).or_default().insert(entry.task.id(), score);
                } else if score < 0 {
                    forbidden.entry(entry.task.id()).or_default().insert(worker_id);
                }
            }
        }

        let any_viable_pair = task_map.keys().any(|tid| {
            let forbidden_here = forbidden.get(tid);
            worker_ids
                .iter()
                .any(|w| !forbidden_here.map(|f| f.contains(w)).unwrap_or(false))
        });
        if !any_viable_pair {
            return Err(ScheduleError::NoViableAssignment);
        }

        let mut state = SchedulerState {
            tasks: task_map,
            executable: Default::default(),
            executing: Default::default(),
            executed: Default::default(),
            attempt_failures: Default::default(),
            workers: worker_map,
            workers_ready: Default::default(),
            workers_idle: worker_ids.iter().cloned().collect(),
            workers_failed: Default::default(),
            current_assignment: Default::default(),
            locality,
            forbidden,
            executable_on: Default::default(),
            concurrency: config.concurrency,
            attempts: config.attempts,
        };

        // Initial classification: stopped_on tasks are already executed;
        // everything else is either immediately executable (no unresolved
        // dependencies) or blocked. Processed in ascending-priority order
        // (spec.md §4.1's "sorts tasks by ascending priority and registers
        // them in that order") rather than `tasks`' own HashMap order, so a
        // run's classification-time worker wake-ups are reproducible.
        let mut ids: Vec<TaskId> = state.tasks.keys().cloned().collect();
        ids.sort_by_key(|id| (state.tasks[id].task.priority(), id.clone()));
        for id in &ids {
            if state.tasks[id].task.stopped_on().is_some() {
                state.tasks.get_mut(id).expect("id from own key set").status = TaskStatus::Executed;
                state.executed.insert(id.clone());
            }
        }
        for id in &ids {
            if state.executed.contains(id) {
                continue;
            }
            let deps = state.tasks[id].task.dependencies();
            let unresolved: HashSet<TaskId> = deps.into_iter().filter(|d| !state.executed.contains(d)).collect();
            if unresolved.is_empty() {
                state.set_executable(id)?;
            } else {
                let entry = state.tasks.get_mut(id).expect("id from own key set");
                entry.blocked_on = unresolved;
                entry.status = TaskStatus::Blocked;
            }
        }

        if state.executable.is_empty() && state.executed.is_empty() {
            return Err(ScheduleError::NoExecutableTasks);
        }

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, _) = watch::channel(build_snapshot(&state, false));

        Ok(Self {
            state: Mutex::new(state),
            notify: Notify::new(),
            abort_requested: AtomicBool::new(false),
            fatal: Mutex::new(None),
            event_tx,
            snapshot_tx,
            config,
        })
    }

    /// Starts the driver loop and returns a handle to observe and control
    /// the run. `done` is invoked once per task completion event and once
    /// more, with `DoneSignal::Finished`, when the run stops.
    pub fn run(self, done: DoneCallback) -> SchedulerHandle {
        let scheduler = Arc::new(self);
        let driver = scheduler.clone();
        let join = tokio::spawn(async move { drive(driver, done).await });
        SchedulerHandle { scheduler, join }
    }

    fn emit_event(&self, event: SchedulerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish_snapshot(&self) {
        let state = self.state.lock().expect("scheduler state poisoned");
        let _ = self.snapshot_tx.send(build_snapshot(&state, self.is_aborted()));
    }

    fn is_aborted(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    /// Requests the run stop. Safe to call from any task, including from
    /// within a `Task::execute` future. Idempotent; the first non-`None`
    /// cause across possibly-concurrent callers wins.
    pub fn abort(&self, cause: Option<ScheduleError>) {
        let was_aborted = self.abort_requested.swap(true, Ordering::SeqCst);
        if let Some(cause) = cause {
            let mut fatal = self.fatal.lock().expect("scheduler fatal-cause mutex poisoned");
            if fatal.is_none() {
                *fatal = Some(cause);
            }
        }
        if !was_aborted {
            self.emit_event(SchedulerEvent::AbortRequested);
        }
        self.notify.notify_waiters();
    }
}

fn build_snapshot(state: &SchedulerState, aborted: bool) -> StatusSnapshot {
    let workers = state
        .workers
        .keys()
        .map(|id| WorkerSnapshot {
            worker: id.clone(),
            failed: state.workers_failed.contains(id),
            current_task: state.current_assignment.get(id).cloned(),
        })
        .collect();
    StatusSnapshot {
        aborted,
        workers,
        executed_count: state.executed.len(),
        pending_count: state.tasks.len() - state.executed.len(),
    }
}

/// A running (or finished) scheduler, returned by [`Scheduler::run`].
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    join: tokio::task::JoinHandle<Result<(), ScheduleError>>,
}

impl SchedulerHandle {
    /// Requests the run abort. `cause`, if given, becomes the error
    /// returned from [`Self::wait`] unless one was already recorded.
    pub fn abort(&self, cause: Option<anyhow::Error>) {
        self.scheduler.abort(cause.map(ScheduleError::Other));
    }

    /// Subscribes to the diagnostic event stream. Lagging receivers miss
    /// events rather than blocking the driver loop.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.scheduler.event_tx.subscribe()
    }

    /// Returns the most recent status snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.scheduler.snapshot_tx.borrow().clone()
    }

    /// Waits for the run to finish, returning the terminal error if any.
    pub async fn wait(self) -> Result<(), ScheduleError> {
        match self.join.await {
            Ok(result) => result,
            Err(join_err) => Err(ScheduleError::invariant(format!("driver task panicked: {join_err}"))),
        }
    }
}

async fn drive(scheduler: Arc<Scheduler>, done: DoneCallback) -> Result<(), ScheduleError> {
    let initial_done: Vec<Arc<dyn Task>> = {
        let state = scheduler.state.lock().expect("scheduler state poisoned");
        state
            .executed
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .map(|e| e.task.clone())
            .collect()
    };
    for task in initial_done {
        done(DoneSignal::Task(task));
    }

    let mut dispatched: JoinSet<(TaskId, WorkerId)> = JoinSet::new();

    loop {
        if scheduler.is_aborted() {
            let executing: Vec<Arc<dyn Task>> = {
                let state = scheduler.state.lock().expect("scheduler state poisoned");
                state
                    .executing
                    .iter()
                    .filter_map(|id| state.tasks.get(id))
                    .map(|e| e.task.clone())
                    .collect()
            };
            for task in executing {
                task.cancel();
            }
            break;
        }

        // Checked here, before trying to pop a ready worker, rather than
        // only after: a run whose every task was already `stopped_on` at
        // classification time never calls `set_executable` and so never
        // pushes anything onto `workers_ready` — without this check the loop
        // would wait on `notify` for a slot that will never arrive.
        let finished = {
            let state = scheduler.state.lock().expect("scheduler state poisoned");
            state.is_finished()
        };
        if finished {
            break;
        }

        let worker_id = {
            let mut state = scheduler.state.lock().expect("scheduler state poisoned");
            state.next_ready_worker()
        };

        let Some(worker_id) = worker_id else {
            tokio::select! {
                _ = scheduler.notify.notified() => {}
                joined = dispatched.join_next(), if !dispatched.is_empty() => {
                    if let Some(Ok((task_id, worker_id))) = joined {
                        on_task_complete(&scheduler, task_id, worker_id, &done).await;
                    }
                }
            }
            continue;
        };

        let task_id = {
            let mut state = scheduler.state.lock().expect("scheduler state poisoned");
            state.select_task(&worker_id)
        };

        let task_id = match task_id {
            Ok(task_id) => task_id,
            Err(err) => {
                scheduler.abort(Some(err));
                continue;
            }
        };

        match task_id {
            Some(task_id) => {
                let task_arc = {
                    let mut state = scheduler.state.lock().expect("scheduler state poisoned");
                    state.remove_dispatched(&worker_id, &task_id);
                    state.executing.insert(task_id.clone());
                    state.current_assignment.insert(worker_id.clone(), task_id.clone());
                    if let Some(entry) = state.tasks.get_mut(&task_id) {
                        entry.status = TaskStatus::Executing;
                    }
                    state.tasks.get(&task_id).expect("just inserted").task.clone()
                };
                scheduler.emit_event(SchedulerEvent::TaskDispatched {
                    task: task_id.clone(),
                    worker: worker_id.clone(),
                });
                scheduler.publish_snapshot();
                let fut = task_arc.execute(worker_id.clone());
                let tid = task_id.clone();
                let wid = worker_id.clone();
                dispatched.spawn(async move {
                    fut.await;
                    (tid, wid)
                });
            }
            None => {
                let mut state = scheduler.state.lock().expect("scheduler state poisoned");
                state.workers_idle.insert(worker_id);
            }
        }
    }

    while let Some(joined) = dispatched.join_next().await {
        if let Ok((task_id, worker_id)) = joined {
            // The loop already decided to stop; still settle in-flight
            // completions so `done`'s per-task contract holds even on abort.
            on_task_complete(&scheduler, task_id, worker_id, &done).await;
        }
    }

    let fatal = scheduler.fatal.lock().expect("scheduler fatal-cause mutex poisoned").take();
    let result = match fatal {
        Some(err) => Err(err),
        None if scheduler.is_aborted() => Err(ScheduleError::Aborted),
        None => Ok(()),
    };

    let reason = match &result {
        Ok(()) => FinishReason::Completed,
        Err(ScheduleError::Aborted) => FinishReason::Failed(ScheduleError::Aborted),
        Err(err) => FinishReason::Failed(ScheduleError::invariant(err.to_string())),
    };
    done(DoneSignal::Finished(Arc::new(reason)));
    scheduler.emit_event(SchedulerEvent::Stopped);
    scheduler.publish_snapshot();
    result
}

/// Handles a single dispatched task's future resolving: determines
/// success/failure, updates readiness, unblocks dependents, and returns the
/// worker to the ready queue. Mirrors spec.md §4.5/§4.6.
///
/// Any fatal outcome (retries exhausted, an unknown task referenced, every
/// worker failed) is recorded via `Scheduler::abort`; the driver loop picks
/// it up on its next iteration rather than being signaled directly, since a
/// single `Option<ScheduleError>` can't be both stored and returned without
/// `ScheduleError` being `Clone` (it isn't, because it can wrap an opaque
/// `anyhow::Error`).
async fn on_task_complete(scheduler: &Arc<Scheduler>, task_id: TaskId, worker_id: WorkerId, done: &DoneCallback) {
    let (task_arc, failed) = {
        let state = scheduler.state.lock().expect("scheduler state poisoned");
        let entry = state.tasks.get(&task_id).expect("dispatched task missing from registry");
        (entry.task.clone(), entry.task.failed())
    };

    done(DoneSignal::Task(task_arc.clone()));

    let mut terminal: Option<ScheduleError> = None;
    let mut stale_completion = false;
    let mut newly_failed_workers: Vec<WorkerId> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    {
        let mut state = scheduler.state.lock().expect("scheduler state poisoned");
        state.executing.remove(&task_id);
        state.current_assignment.remove(&worker_id);

        if !failed {
            let blocked_on_empty = state.tasks.get(&task_id).map(|e| e.blocked_on.is_empty()).unwrap_or(true);
            if blocked_on_empty {
                state.executed.insert(task_id.clone());
                if let Some(entry) = state.tasks.get_mut(&task_id) {
                    entry.status = TaskStatus::Executed;
                }
                let dependents: Vec<TaskId> =
                    state.tasks.get(&task_id).map(|e| e.dependents.clone()).unwrap_or_default();
                for dep in dependents {
                    let became_ready = if let Some(entry) = state.tasks.get_mut(&dep) {
                        entry.blocked_on.remove(&task_id);
                        entry.blocked_on.is_empty() && matches!(entry.status, TaskStatus::Blocked)
                    } else {
                        false
                    };
                    if became_ready {
                        if let Err(err) = state.set_executable(&dep) {
                            terminal.get_or_insert(err);
                        }
                    }
                }
            } else {
                if let Some(entry) = state.tasks.get_mut(&task_id) {
                    entry.status = TaskStatus::Blocked;
                }
                stale_completion = true;
            }
        } else {
            // `executing.remove` above already dropped the set-membership
            // side of this task's state; the status enum must follow before
            // `resolve_failure` runs, or its own-state guard (matching
            // `Executable`/`Executing`) sees the task as still in flight and
            // wrongly treats this failure as already handled.
            if let Some(entry) = state.tasks.get_mut(&task_id) {
                entry.status = TaskStatus::Blocked;
            }
            let cause = task_arc.exception().unwrap_or_else(|| {
                TaskFailure::Other(Arc::new(anyhow::anyhow!("task reported failure without an exception")))
            });
            let outcome = state.resolve_failure(task_id.clone(), cause);
            terminal = outcome.terminal;
            newly_failed_workers = outcome.newly_failed_workers;
            warnings = outcome.warnings;
        }

        state.workers_ready.push_back(worker_id.clone());
    }

    if stale_completion {
        scheduler.emit_event(SchedulerEvent::StaleCompletionDiscarded { task: task_id });
    }
    for worker in newly_failed_workers {
        scheduler.emit_event(SchedulerEvent::WorkerMarkedFailed { worker });
    }
    for message in warnings {
        scheduler.emit_event(SchedulerEvent::Warning { message });
    }
    scheduler.notify.notify_one();
    scheduler.publish_snapshot();

    if let Some(err) = terminal {
        scheduler.abort(Some(err));
    }
}
