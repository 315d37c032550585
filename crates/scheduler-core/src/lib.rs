#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Core of a distributed DAG task scheduler.
//!
//! Given a set of tasks with dependencies and a set of workers, drives every
//! task to completion on some worker while honoring per-task worker
//! affinities and restrictions, a bounded per-worker concurrency, a bounded
//! retry budget, and cascading invalidation of dependents when an upstream
//! task must be redone.
//!
//! Building the task/dependency graph, discovering workers, the RPC
//! transport between this process and a worker, and persisting scheduler
//! state are all the caller's concern; this crate only implements the
//! dispatch loop in between.

mod assignment;
mod config;
mod error;
mod event;
mod failure;
mod ids;
mod readiness;
mod scheduler;
mod state;
mod task;
mod worker;

pub use config::SchedulerConfig;
pub use error::ScheduleError;
pub use event::{DoneSignal, FinishReason, SchedulerEvent, StatusSnapshot, WorkerSnapshot};
pub use ids::{Priority, TaskId, WorkerId};
pub use scheduler::{DoneCallback, Scheduler, SchedulerHandle};
pub use task::{BoxFuture, Task, TaskFailure};
pub use worker::Worker;

#[cfg(test)]
mod tests;
