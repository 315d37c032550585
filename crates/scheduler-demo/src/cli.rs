use clap::Parser;

fn default_parallel_workers() -> u16 {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(32) as u16
}

/// In-process demo of the scheduler core: builds a linear chain of tasks and
/// drives it across a pool of fixture workers.
#[derive(Debug, Clone, Parser)]
#[command(name = "scheduler-demo", version, about = "Scheduler core demo runner")]
pub struct Cli {
    /// Number of tasks in the demo chain (`A1 -> A2 -> ... -> An`).
    #[arg(short = 'n', long, default_value_t = 6)]
    pub chain_len: u32,

    /// Number of fixture workers to run the chain across.
    #[arg(short = 'w', long, default_value_t = default_parallel_workers())]
    pub workers: u16,

    /// Max concurrent in-flight tasks per worker slot.
    #[arg(long, default_value_t = 2)]
    pub concurrency: usize,

    /// Max attempts per task before it is considered terminally failed.
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,

    /// Make the task at this 1-based position in the chain fail once before
    /// succeeding, to demonstrate the retry path. 0 disables this.
    #[arg(long, default_value_t = 0)]
    pub fail_once_at: u32,

    /// Simulated work duration per task attempt, in milliseconds.
    #[arg(long, default_value_t = 150)]
    pub work_ms: u64,
}
