use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::{BoxFuture, Priority, Task, TaskFailure, TaskId, Worker, WorkerId};

/// A scripted outcome for one execution attempt of a [`FixtureTask`].
#[derive(Clone)]
pub(super) enum Outcome {
    Success,
    Fail(TaskFailure),
}

struct FixtureTaskInner {
    id: TaskId,
    priority: Priority,
    dependencies: HashSet<TaskId>,
    dependents: Mutex<HashSet<TaskId>>,
    stopped_on: Mutex<Option<WorkerId>>,
    locality: Mutex<Vec<(WorkerId, i64)>>,
    failed: AtomicBool,
    exception: Mutex<Option<TaskFailure>>,
    executed_on: Mutex<Vec<WorkerId>>,
    run_count: AtomicUsize,
    behavior: Mutex<VecDeque<Outcome>>,
}

/// A `Task` implementation driven entirely by a scripted sequence of
/// outcomes, for exercising the scheduler without real workers or RPC.
pub(super) struct FixtureTask(Arc<FixtureTaskInner>);

impl std::fmt::Debug for FixtureTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureTask").field("id", &self.0.id).finish()
    }
}

impl FixtureTask {
    pub(super) fn new(id: &str, priority: Priority, deps: &[&Arc<FixtureTask>]) -> Arc<FixtureTask> {
        let dependencies = deps.iter().map(|d| d.0.id.clone()).collect();
        let task = Arc::new(FixtureTask(Arc::new(FixtureTaskInner {
            id: TaskId::new(id),
            priority,
            dependencies,
            dependents: Mutex::new(HashSet::new()),
            stopped_on: Mutex::new(None),
            locality: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
            exception: Mutex::new(None),
            executed_on: Mutex::new(Vec::new()),
            run_count: AtomicUsize::new(0),
            behavior: Mutex::new(VecDeque::new()),
        })));
        for dep in deps {
            dep.0.dependents.lock().unwrap().insert(task.0.id.clone());
        }
        task
    }

    pub(super) fn set_locality(&self, scores: Vec<(WorkerId, i64)>) {
        *self.0.locality.lock().unwrap() = scores;
    }

    pub(super) fn set_stopped_on(&self, worker: WorkerId) {
        *self.0.stopped_on.lock().unwrap() = Some(worker);
    }

    pub(super) fn script(&self, outcomes: Vec<Outcome>) {
        *self.0.behavior.lock().unwrap() = outcomes.into_iter().collect();
    }

    pub(super) fn run_count(&self) -> usize {
        self.0.run_count.load(Ordering::SeqCst)
    }

    pub(super) fn executed_on(&self) -> Vec<WorkerId> {
        self.0.executed_on.lock().unwrap().clone()
    }
}

impl Task for FixtureTask {
    fn id(&self) -> TaskId {
        self.0.id.clone()
    }

    fn priority(&self) -> Priority {
        self.0.priority
    }

    fn dependencies(&self) -> HashSet<TaskId> {
        self.0.dependencies.clone()
    }

    fn dependents(&self) -> HashSet<TaskId> {
        self.0.dependents.lock().unwrap().clone()
    }

    fn stopped_on(&self) -> Option<WorkerId> {
        self.0.stopped_on.lock().unwrap().clone()
    }

    fn executed_on_last(&self) -> Option<WorkerId> {
        self.0.executed_on.lock().unwrap().last().cloned()
    }

    fn executed_on(&self) -> Vec<WorkerId> {
        self.0.executed_on.lock().unwrap().clone()
    }

    fn failed(&self) -> bool {
        self.0.failed.load(Ordering::SeqCst)
    }

    fn exception(&self) -> Option<TaskFailure> {
        self.0.exception.lock().unwrap().clone()
    }

    fn mark_failed(&self, failure: TaskFailure) {
        self.0.failed.store(true, Ordering::SeqCst);
        *self.0.exception.lock().unwrap() = Some(failure);
    }

    fn execute(&self, worker: WorkerId) -> BoxFuture<'static, ()> {
        let inner = self.0.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            inner.executed_on.lock().unwrap().push(worker);
            inner.run_count.fetch_add(1, Ordering::SeqCst);
            let outcome = inner
                .behavior
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Outcome::Success);
            match outcome {
                Outcome::Success => {
                    inner.failed.store(false, Ordering::SeqCst);
                    *inner.exception.lock().unwrap() = None;
                }
                Outcome::Fail(cause) => {
                    inner.failed.store(true, Ordering::SeqCst);
                    *inner.exception.lock().unwrap() = Some(cause);
                }
            }
        })
    }

    fn locality(&self, _workers: &[WorkerId]) -> Vec<(WorkerId, i64)> {
        self.0.locality.lock().unwrap().clone()
    }
}

#[derive(Debug)]
struct FixtureWorker(WorkerId);

impl Worker for FixtureWorker {
    fn name(&self) -> &WorkerId {
        &self.0
    }
}

pub(super) fn worker(name: &str) -> Arc<dyn Worker> {
    Arc::new(FixtureWorker(WorkerId::new(name)))
}
