mod cli;
mod tasks;

use std::time::Duration;

use clap::Parser;

use scheduler_core::{DoneSignal, FinishReason, Scheduler, SchedulerConfig, SchedulerEvent};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.chain_len == 0 {
        anyhow::bail!("--chain-len must be >= 1");
    }
    if cli.workers == 0 {
        anyhow::bail!("--workers must be >= 1");
    }

    let chain = tasks::build_chain(cli.chain_len, cli.fail_once_at, Duration::from_millis(cli.work_ms));
    let workers = tasks::build_workers(cli.workers);

    let config = SchedulerConfig {
        concurrency: cli.concurrency,
        attempts: cli.attempts,
    };

    println!(
        "scheduler-demo: {} tasks across {} worker(s), concurrency={}, attempts={}",
        cli.chain_len, cli.workers, cli.concurrency, cli.attempts
    );

    let scheduler = Scheduler::new(chain, workers, config)?;
    let done = Box::new(|signal: DoneSignal| match signal {
        DoneSignal::Task(task) => {
            if task.failed() {
                let cause = task.exception().map(|e| e.to_string()).unwrap_or_else(|| "unknown".into());
                println!("task {} failed: {cause}", task.id());
            } else {
                println!("task {} done", task.id());
            }
        }
        DoneSignal::Finished(reason) => match &*reason {
            FinishReason::Completed => println!("run complete"),
            FinishReason::Failed(err) => println!("run failed: {err}"),
        },
    });

    let handle = scheduler.run(done);
    let mut events = handle.subscribe();

    let events_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::WorkerMarkedFailed { worker }) => {
                    eprintln!("warning: worker {worker} marked failed");
                }
                Ok(SchedulerEvent::StaleCompletionDiscarded { task }) => {
                    tracing::debug!(%task, "discarded stale completion");
                }
                Ok(SchedulerEvent::Stopped) => break,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let result = handle.wait().await;
    events_task.abort();
    result?;
    Ok(())
}
