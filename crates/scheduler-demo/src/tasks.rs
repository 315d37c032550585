use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scheduler_core::{BoxFuture, Priority, Task, TaskFailure, TaskId, Worker, WorkerId};

/// An in-process stand-in for a task that would otherwise run on a remote
/// worker over RPC: sleeps for `work` to simulate the round trip, then
/// succeeds, or fails once (if `fail_once` is set) before succeeding on the
/// next attempt.
struct DemoTask {
    id: TaskId,
    priority: Priority,
    dependencies: HashSet<TaskId>,
    dependents: Mutex<HashSet<TaskId>>,
    fail_once: bool,
    work: Duration,
    attempted: AtomicBool,
    failed: AtomicBool,
    exception: Mutex<Option<TaskFailure>>,
    executed_on: Mutex<Vec<WorkerId>>,
}

impl fmt::Debug for DemoTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemoTask").field("id", &self.id).finish()
    }
}

impl Task for DemoTask {
    fn id(&self) -> TaskId {
        self.id.clone()
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn dependencies(&self) -> HashSet<TaskId> {
        self.dependencies.clone()
    }

    fn dependents(&self) -> HashSet<TaskId> {
        self.dependents.lock().unwrap().clone()
    }

    fn executed_on_last(&self) -> Option<WorkerId> {
        self.executed_on.lock().unwrap().last().cloned()
    }

    fn executed_on(&self) -> Vec<WorkerId> {
        self.executed_on.lock().unwrap().clone()
    }

    fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    fn exception(&self) -> Option<TaskFailure> {
        self.exception.lock().unwrap().clone()
    }

    fn mark_failed(&self, failure: TaskFailure) {
        self.failed.store(true, Ordering::SeqCst);
        *self.exception.lock().unwrap() = Some(failure);
    }

    // `execute` takes `&self` rather than `self: Arc<Self>` (see Task::execute's
    // doc), so nothing here can be captured by reference into the returned
    // future; the outcome is decided synchronously before the future is built,
    // and the future itself only sleeps to simulate remote latency.
    fn execute(&self, worker: WorkerId) -> BoxFuture<'static, ()> {
        tracing::trace!(task = %self.id, worker = %worker, "executing demo task");
        let fail_this_attempt = self.fail_once && !self.attempted.swap(true, Ordering::SeqCst);
        if fail_this_attempt {
            self.mark_failed(TaskFailure::Other(Arc::new(anyhow::anyhow!(
                "simulated transient failure on first attempt"
            ))));
        } else {
            self.failed.store(false, Ordering::SeqCst);
            *self.exception.lock().unwrap() = None;
        }
        self.executed_on.lock().unwrap().push(worker);
        let work = self.work;
        Box::pin(async move {
            tokio::time::sleep(work).await;
        })
    }

    fn locality(&self, _workers: &[WorkerId]) -> Vec<(WorkerId, i64)> {
        Vec::new()
    }
}

/// Builds a linear chain `A1 -> A2 -> ... -> An`, where `Ak+1` depends on
/// `Ak`. `fail_once_at`, if non-zero, names the 1-based position of the task
/// that fails on its first attempt before succeeding on retry.
pub fn build_chain(len: u32, fail_once_at: u32, work: Duration) -> Vec<Arc<dyn Task>> {
    let mut concrete: Vec<Arc<DemoTask>> = Vec::with_capacity(len as usize);
    let mut previous: Option<TaskId> = None;
    for i in 1..=len {
        let id = TaskId::new(format!("A{i}"));
        let dependencies = previous.clone().into_iter().collect();
        let task = Arc::new(DemoTask {
            id: id.clone(),
            priority: Priority(i),
            dependencies,
            dependents: Mutex::new(HashSet::new()),
            fail_once: fail_once_at == i,
            work,
            attempted: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            exception: Mutex::new(None),
            executed_on: Mutex::new(Vec::new()),
        });
        if let Some(prev) = &previous {
            if let Some(prev_task) = concrete.iter().find(|t| &t.id == prev) {
                prev_task.dependents.lock().unwrap().insert(id.clone());
            }
        }
        concrete.push(task);
        previous = Some(id);
    }
    concrete.into_iter().map(|t| t as Arc<dyn Task>).collect()
}

#[derive(Debug)]
struct DemoWorker(WorkerId);

impl Worker for DemoWorker {
    fn name(&self) -> &WorkerId {
        &self.0
    }
}

/// Builds `count` fixture workers named `W1..Wcount`.
pub fn build_workers(count: u16) -> Vec<Arc<dyn Worker>> {
    (1..=count)
        .map(|i| Arc::new(DemoWorker(WorkerId::new(format!("W{i}")))) as Arc<dyn Worker>)
        .collect()
}
