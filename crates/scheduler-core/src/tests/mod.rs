mod fixtures;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fixtures::{worker, FixtureTask, Outcome};

use crate::{DoneSignal, Priority, Scheduler, SchedulerConfig, Task, TaskFailure, TaskId, WorkerId};

fn config(concurrency: usize, attempts: u32) -> SchedulerConfig {
    SchedulerConfig { concurrency, attempts }
}

/// Upcasts a batch of concrete fixture tasks into the trait-object form the
/// scheduler takes; a plain `Vec<Arc<FixtureTask>>` does not coerce on its
/// own.
fn tasks(ts: Vec<Arc<FixtureTask>>) -> Vec<Arc<dyn Task>> {
    ts.into_iter().map(|t| t as Arc<dyn Task>).collect()
}

/// Collects every `done(task)` id, in order, plus whether the final
/// `done(Finished(..))` observed success.
#[derive(Default)]
struct DoneLog {
    task_order: Mutex<Vec<TaskId>>,
    finished: Mutex<Option<bool>>,
}

fn recording_done(log: Arc<DoneLog>) -> crate::DoneCallback {
    Box::new(move |signal| match signal {
        DoneSignal::Task(task) => {
            log.task_order.lock().unwrap().push(task.id());
        }
        DoneSignal::Finished(reason) => {
            let ok = matches!(&*reason, crate::FinishReason::Completed);
            *log.finished.lock().unwrap() = Some(ok);
        }
    })
}

async fn run_to_completion(scheduler: Scheduler, log: Arc<DoneLog>) -> Result<(), crate::ScheduleError> {
    let handle = scheduler.run(recording_done(log));
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("scheduler run timed out")
}

#[tokio::test]
async fn s1_linear_chain_happy_path() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    let b = FixtureTask::new("B", Priority(2), &[&a]);
    let c = FixtureTask::new("C", Priority(3), &[&b]);

    let scheduler = Scheduler::new(tasks(vec![a.clone(), b.clone(), c.clone()]), vec![worker("W")], config(1, 3))
        .expect("construction");

    let log = Arc::new(DoneLog::default());
    run_to_completion(scheduler, log.clone()).await.expect("run succeeds");

    assert_eq!(
        *log.task_order.lock().unwrap(),
        vec![TaskId::new("A"), TaskId::new("B"), TaskId::new("C")]
    );
    assert_eq!(*log.finished.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn s2_locality_preference() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    a.set_locality(vec![(WorkerId::new("W2"), 1)]);
    let b = FixtureTask::new("B", Priority(2), &[]);

    let scheduler = Scheduler::new(
        tasks(vec![a.clone(), b.clone()]),
        vec![worker("W1"), worker("W2")],
        config(1, 3),
    )
    .expect("construction");

    let log = Arc::new(DoneLog::default());
    run_to_completion(scheduler, log).await.expect("run succeeds");

    assert_eq!(a.executed_on(), vec![WorkerId::new("W2")]);
}

#[tokio::test]
async fn s3_forbidden_worker_runs_on_survivor() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    a.set_locality(vec![(WorkerId::new("W1"), -1)]);

    let scheduler = Scheduler::new(tasks(vec![a.clone()]), vec![worker("W1"), worker("W2")], config(1, 3))
        .expect("construction");

    let log = Arc::new(DoneLog::default());
    run_to_completion(scheduler, log).await.expect("run succeeds");

    assert_eq!(a.executed_on(), vec![WorkerId::new("W2")]);
}

#[tokio::test]
async fn s3_forbidden_on_the_only_worker_fails_construction() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    a.set_locality(vec![(WorkerId::new("W1"), -1)]);

    let result = Scheduler::new(tasks(vec![a]), vec![worker("W1")], config(1, 3));
    assert!(matches!(result, Err(crate::ScheduleError::NoViableAssignment)));
}

#[tokio::test]
async fn s4_retry_then_success() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    a.script(vec![
        Outcome::Fail(TaskFailure::Other(Arc::new(anyhow::anyhow!("boom 1")))),
        Outcome::Fail(TaskFailure::Other(Arc::new(anyhow::anyhow!("boom 2")))),
        Outcome::Success,
    ]);

    let scheduler = Scheduler::new(tasks(vec![a.clone()]), vec![worker("W")], config(1, 3)).expect("construction");

    let log = Arc::new(DoneLog::default());
    run_to_completion(scheduler, log.clone()).await.expect("run succeeds");

    assert_eq!(a.run_count(), 3);
    assert_eq!(log.task_order.lock().unwrap().len(), 3);
    assert_eq!(*log.finished.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn s4_retry_exhaustion_is_terminal() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    a.script(vec![
        Outcome::Fail(TaskFailure::Other(Arc::new(anyhow::anyhow!("boom 1")))),
        Outcome::Fail(TaskFailure::Other(Arc::new(anyhow::anyhow!("boom 2")))),
        Outcome::Fail(TaskFailure::Other(Arc::new(anyhow::anyhow!("boom 3")))),
    ]);

    let scheduler = Scheduler::new(tasks(vec![a.clone()]), vec![worker("W")], config(1, 3)).expect("construction");

    let log = Arc::new(DoneLog::default());
    let result = run_to_completion(scheduler, log.clone()).await;

    assert!(matches!(result, Err(crate::ScheduleError::RetriesExhausted { .. })));
    assert_eq!(a.run_count(), 3);
    assert_eq!(*log.finished.lock().unwrap(), Some(false));
}

#[tokio::test]
async fn s5_dependency_cascade() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    let b = FixtureTask::new("B", Priority(2), &[&a]);

    // B's first attempt reports that A's result (produced on W1) is stale.
    let mut failures = std::collections::HashMap::new();
    failures.insert(Some(WorkerId::new("W1")), std::iter::once(TaskId::new("A")).collect());
    b.script(vec![
        Outcome::Fail(TaskFailure::DependenciesFailed { by_worker: failures }),
        Outcome::Success,
    ]);

    let scheduler = Scheduler::new(
        tasks(vec![a.clone(), b.clone()]),
        vec![worker("W1"), worker("W2")],
        config(1, 3),
    )
    .expect("construction");

    let log = Arc::new(DoneLog::default());
    run_to_completion(scheduler, log).await.expect("run succeeds");

    // A re-executed once after being cascaded, B re-executed once after A.
    assert_eq!(a.run_count(), 2);
    assert_eq!(b.run_count(), 2);
}

#[tokio::test]
async fn s6_worker_loss_reschedules_on_survivor() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    a.script(vec![Outcome::Fail(TaskFailure::NotConnected), Outcome::Success]);

    let scheduler = Scheduler::new(tasks(vec![a.clone()]), vec![worker("W1"), worker("W2")], config(1, 3))
        .expect("construction");

    let log = Arc::new(DoneLog::default());
    run_to_completion(scheduler, log).await.expect("run succeeds");

    assert_eq!(a.run_count(), 2);
}

#[tokio::test]
async fn s6_worker_loss_with_only_worker_aborts() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    a.script(vec![Outcome::Fail(TaskFailure::NotConnected)]);

    let scheduler = Scheduler::new(tasks(vec![a.clone()]), vec![worker("W1")], config(1, 3)).expect("construction");

    let log = Arc::new(DoneLog::default());
    let result = run_to_completion(scheduler, log).await;
    assert!(matches!(result, Err(crate::ScheduleError::AllWorkersFailed)));
}

#[test]
fn empty_task_set_is_rejected() {
    let result = Scheduler::new(tasks(vec![]), vec![worker("W")], config(1, 3));
    assert!(matches!(result, Err(crate::ScheduleError::EmptyTaskSet)));
}

#[tokio::test]
async fn fully_stopped_on_run_finishes_without_executing_anything() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    a.set_stopped_on(WorkerId::new("W"));
    let b = FixtureTask::new("B", Priority(2), &[&a]);
    b.set_stopped_on(WorkerId::new("W"));

    let scheduler = Scheduler::new(tasks(vec![a.clone(), b.clone()]), vec![worker("W")], config(1, 3))
        .expect("construction");

    let log = Arc::new(DoneLog::default());
    run_to_completion(scheduler, log.clone()).await.expect("run succeeds");

    assert_eq!(a.run_count(), 0);
    assert_eq!(b.run_count(), 0);
    assert_eq!(*log.finished.lock().unwrap(), Some(true));
}

#[test]
fn duplicate_task_id_is_rejected() {
    let a1 = FixtureTask::new("A", Priority(1), &[]);
    let a2 = FixtureTask::new("A", Priority(2), &[]);
    let result = Scheduler::new(tasks(vec![a1, a2]), vec![worker("W")], config(1, 3));
    assert!(matches!(result, Err(crate::ScheduleError::DuplicateTaskId(_))));
}

#[tokio::test]
async fn stopped_on_task_is_treated_as_already_executed() {
    let a = FixtureTask::new("A", Priority(1), &[]);
    a.set_stopped_on(WorkerId::new("W"));
    let b = FixtureTask::new("B", Priority(2), &[&a]);

    let scheduler = Scheduler::new(tasks(vec![a.clone(), b.clone()]), vec![worker("W")], config(1, 3))
        .expect("construction");

    let log = Arc::new(DoneLog::default());
    run_to_completion(scheduler, log.clone()).await.expect("run succeeds");

    assert_eq!(a.run_count(), 0);
    assert_eq!(b.run_count(), 1);
    let order = log.task_order.lock().unwrap().clone();
    assert_eq!(order, vec![TaskId::new("A"), TaskId::new("B")]);
}
