//! Run statistics shared by the scheduler workers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::retrieval::TaskReport;

/// Failed task as reported in the run summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub series: String,
    /// Error message including its source chain
    pub error: String,
}

/// Run statistics (thread-safe)
#[derive(Debug, Default)]
pub struct RunStats {
    /// Total tasks submitted
    pub total_tasks: AtomicU64,

    /// Tasks that closed normally
    pub completed_count: AtomicU64,

    /// Tasks that faulted
    pub failed_count: AtomicU64,

    /// Pages fetched by completed tasks
    pub pages_fetched: AtomicU64,

    /// Rows written by completed tasks
    pub rows_written: AtomicU64,

    /// Timeouts absorbed by retries
    pub retries: AtomicU64,

    failures: Mutex<Vec<TaskFailure>>,
}

impl RunStats {
    /// Create new stats counter
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a task that closed normally
    pub fn record_success(&self, report: &TaskReport) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.pages_fetched.fetch_add(report.pages, Ordering::Relaxed);
        self.rows_written
            .fetch_add(report.rows_written, Ordering::Relaxed);
        self.retries
            .fetch_add(u64::from(report.retries), Ordering::Relaxed);
    }

    /// Record a faulted task
    pub fn record_failure(&self, series: &str, error: String) {
        self.failed_count.fetch_add(1, Ordering::Relaxed);
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(TaskFailure {
                series: series.to_string(),
                error,
            });
    }

    /// Build a summary of the run so far
    pub fn summary(&self, elapsed: Duration) -> RunSummary {
        RunSummary {
            total: self.total_tasks.load(Ordering::Relaxed),
            completed: self.completed_count.load(Ordering::Relaxed),
            failed: self.failed_count.load(Ordering::Relaxed),
            pages: self.pages_fetched.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self
                .failures
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            elapsed,
        }
    }

    /// Calculate completion percentage
    pub fn completion_percentage(&self) -> f64 {
        let total = self.total_tasks.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        let finished = self.completed_count.load(Ordering::Relaxed)
            + self.failed_count.load(Ordering::Relaxed);
        (finished as f64 / total as f64) * 100.0
    }
}

/// Outcome of a whole retrieval run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub pages: u64,
    pub rows_written: u64,
    pub retries: u64,
    pub failures: Vec<TaskFailure>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// True when no task failed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            return 1.0;
        }
        self.completed as f64 / finished as f64
    }
}
