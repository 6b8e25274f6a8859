//! Bounded-concurrency scheduling of retrieval tasks
//!
//! The scheduler keeps at most `concurrency` tasks running, so at most that
//! many page requests are ever in flight against the historian.
//!
//! # Strategies
//!
//! ```text
//! Dynamic (default)                      Static
//!
//!   backlog: [t4 t5 t6 ...]                worker 0: t0 ─▶ t3 ─▶ t6
//!                │ refill on completion    worker 1: t1 ─▶ t4
//!                ▼                         worker 2: t2 ─▶ t5
//!   window:  [t0] [t1] [t2]
//! ```
//!
//! - **Dynamic**: a window of running tasks is refilled from a FIFO backlog
//!   each time a task finishes. Completion is awaited on a
//!   [`tokio::task::JoinSet`], so a free slot is reused as soon as it opens.
//! - **Static**: tasks are dealt round-robin to `min(concurrency, count)`
//!   workers up front, and each worker runs its share sequentially.
//!
//! Faults are isolated: a failed or panicking task is logged, counted and
//! evicted while every other task keeps running. On eviction the scheduler
//! reads the task's [`TaskStatus`] flag; only a closed task counts as
//! completed.

pub mod stats;

pub use stats::{RunStats, RunSummary, TaskFailure};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::historian::Historian;
use crate::retrieval::{RetrievalTask, TaskReport, TaskStatus};

// ============================================================================
// Strategy
// ============================================================================

/// How tasks are assigned to the concurrency slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerStrategy {
    /// Refill a slot from the backlog as soon as its task finishes
    #[default]
    Dynamic,
    /// Deal tasks round-robin to fixed workers up front
    Static,
}

impl SchedulerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dynamic => "dynamic",
            Self::Static => "static",
        }
    }
}

impl fmt::Display for SchedulerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dynamic" => Ok(Self::Dynamic),
            "static" => Ok(Self::Static),
            other => Err(format!(
                "unknown strategy '{other}': expected dynamic or static"
            )),
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Result of one task as seen by the scheduler
struct Outcome {
    series: String,
    status: Arc<TaskStatus>,
    result: Result<TaskReport>,
}

/// Runs retrieval tasks with a hard cap on concurrency
pub struct RetrievalScheduler {
    historian: Arc<dyn Historian>,
    concurrency: usize,
    strategy: SchedulerStrategy,
    stats: Arc<RunStats>,
}

impl RetrievalScheduler {
    /// Create a dynamic scheduler; a concurrency of 0 is treated as 1
    pub fn new(historian: Arc<dyn Historian>, concurrency: usize) -> Self {
        Self {
            historian,
            concurrency: concurrency.max(1),
            strategy: SchedulerStrategy::default(),
            stats: RunStats::new(),
        }
    }

    /// Set the scheduling strategy
    pub fn with_strategy(mut self, strategy: SchedulerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn strategy(&self) -> SchedulerStrategy {
        self.strategy
    }

    /// Shared run statistics
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    /// Run every task to completion or failure
    ///
    /// Each task is started exactly once. Task failures are reported in the
    /// summary and never abort the run.
    pub async fn run(&self, tasks: Vec<RetrievalTask>) -> RunSummary {
        let started = Instant::now();
        self.stats
            .total_tasks
            .fetch_add(tasks.len() as u64, Ordering::Relaxed);

        tracing::info!(
            tasks = tasks.len(),
            concurrency = self.concurrency,
            strategy = %self.strategy,
            "Starting retrieval"
        );

        match self.strategy {
            SchedulerStrategy::Dynamic => self.run_dynamic(tasks).await,
            SchedulerStrategy::Static => self.run_static(tasks).await,
        }

        let summary = self.stats.summary(started.elapsed());
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            rows = summary.rows_written,
            pages = summary.pages,
            retries = summary.retries,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Retrieval completed"
        );
        summary
    }

    async fn run_dynamic(&self, tasks: Vec<RetrievalTask>) {
        let mut backlog: VecDeque<RetrievalTask> = tasks.into();
        let mut window: JoinSet<Outcome> = JoinSet::new();

        let window_size = self.concurrency.min(backlog.len());
        while window.len() < window_size {
            match backlog.pop_front() {
                Some(task) => {
                    window.spawn(run_guarded(task, Arc::clone(&self.historian)));
                }
                None => break,
            }
        }

        while let Some(joined) = window.join_next().await {
            match joined {
                Ok(outcome) => record(&self.stats, outcome),
                Err(e) => record_join_error(&self.stats, e),
            }

            if let Some(task) = backlog.pop_front() {
                tracing::debug!(
                    series = %task.series(),
                    remaining = backlog.len(),
                    "Starting queued task"
                );
                window.spawn(run_guarded(task, Arc::clone(&self.historian)));
            }
        }
    }

    async fn run_static(&self, tasks: Vec<RetrievalTask>) {
        let workers = self.concurrency.min(tasks.len());
        if workers == 0 {
            return;
        }

        let mut lanes: Vec<Vec<RetrievalTask>> = (0..workers).map(|_| Vec::new()).collect();
        for (index, task) in tasks.into_iter().enumerate() {
            lanes[index % workers].push(task);
        }

        let mut set = JoinSet::new();
        for (worker_id, lane) in lanes.into_iter().enumerate() {
            let historian = Arc::clone(&self.historian);
            let stats = Arc::clone(&self.stats);

            set.spawn(async move {
                tracing::debug!(worker_id, tasks = lane.len(), "Worker started");
                for task in lane {
                    record(&stats, run_guarded(task, Arc::clone(&historian)).await);
                }
                tracing::debug!(worker_id, "Worker shutting down");
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                record_join_error(&self.stats, e);
            }
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Run one task, turning a panic into a task fault
async fn run_guarded(mut task: RetrievalTask, historian: Arc<dyn Historian>) -> Outcome {
    let series = task.series().to_string();
    let status = task.status();
    let result = AssertUnwindSafe(task.run(historian.as_ref()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(Error::TaskPanicked {
                series: series.clone(),
                reason: panic_message(panic.as_ref()),
            })
        });
    Outcome {
        series,
        status,
        result,
    }
}

/// Count an evicted task; a report from a task that is not closed is a fault
fn record(stats: &RunStats, outcome: Outcome) {
    let Outcome {
        series,
        status,
        result,
    } = outcome;
    let series = series.as_str();
    let closed = status.is_closed();
    let result = match result {
        Ok(_) if !closed => Err(Error::TaskNotClosed {
            series: series.to_string(),
        }),
        other => other,
    };

    match result {
        Ok(report) => {
            tracing::debug!(
                series,
                rows = report.rows_written,
                pages = report.pages,
                "Task completed"
            );
            stats.record_success(&report);
        }
        Err(e) => {
            let message = e.report();
            tracing::error!(
                series,
                closed,
                category = e.category().as_str(),
                error = %message,
                "Task failed"
            );
            stats.record_failure(series, message);
        }
    }
}

fn record_join_error(stats: &RunStats, e: tokio::task::JoinError) {
    tracing::error!(error = %e, "Task did not finish");
    stats.record_failure("<unknown>", e.to_string());
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
