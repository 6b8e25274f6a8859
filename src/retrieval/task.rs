//! Per-series retrieval state machine
//!
//! ```text
//! Idle ──▶ FetchPending ──▶ Processing ──▶ Closed
//!               ▲               │
//!               └───────────────┘  (next page or retry)
//! ```
//!
//! A task walks its time range one page at a time. Recorded pages are bounded
//! by row count, interpolated pages by a time window of `page_size` intervals.
//! Timeouts replay the same window until the retry budget is spent; every
//! other failure ends the task.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cursor::PageCursor;
use crate::error::{Error, Result};
use crate::historian::{Historian, HistorianError, SeriesHandle};
use crate::models::{Sample, Sampling, SeriesRequest};
use crate::storage::{OutputPartitionWriter, TimeResolution};
use crate::utils::retry::RetryPolicy;

/// Settings shared by every task of a run
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Maximum rows (recorded) or intervals (interpolated) per page
    pub page_size: usize,

    /// Root directory of the partitioned output
    pub output_dir: PathBuf,

    /// Output partitioning policy
    pub resolution: TimeResolution,

    /// Timeout budget and backoff
    pub retry: RetryPolicy,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            page_size: 10_000,
            output_dir: PathBuf::from("./output"),
            resolution: TimeResolution::None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    FetchPending,
    Processing,
    Closed,
}

/// Completion flag shared between a task and the scheduler
#[derive(Debug, Default)]
pub struct TaskStatus {
    closed: Mutex<bool>,
}

impl TaskStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Mark the task closed; returns `false` if it already was
    pub fn close(&self) -> bool {
        let mut closed = self.closed.lock().unwrap_or_else(|p| p.into_inner());
        !std::mem::replace(&mut *closed, true)
    }
}

/// Outcome of a finished task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub series: String,
    pub pages: u64,
    pub rows_written: u64,
    pub files_opened: u64,
    /// Timeouts absorbed by the retry budget
    pub retries: u32,
}

/// One page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageQuery {
    Recorded {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_count: usize,
    },
    Interpolated {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
        /// The window reaches the end of the requested range
        last: bool,
    },
}

impl PageQuery {
    fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        match *self {
            Self::Recorded { start, end, .. } | Self::Interpolated { start, end, .. } => {
                (start, end)
            }
        }
    }
}

/// Paginated retrieval of one series into partitioned files
#[derive(Debug)]
pub struct RetrievalTask {
    request: SeriesRequest,
    handle: SeriesHandle,
    sampling: Sampling,
    cursor: PageCursor,
    retry: RetryPolicy,
    exception_count: u32,
    pages: u64,
    state: TaskState,
    status: Arc<TaskStatus>,
    writer: OutputPartitionWriter,
}

impl RetrievalTask {
    pub fn new(request: SeriesRequest, handle: SeriesHandle, options: &TaskOptions) -> Self {
        let writer =
            OutputPartitionWriter::new(&options.output_dir, &handle.name, options.resolution);
        Self {
            sampling: request.sampling(),
            cursor: PageCursor::new(request.start, options.page_size),
            retry: options.retry.clone(),
            exception_count: 0,
            pages: 0,
            state: TaskState::Idle,
            status: TaskStatus::new(),
            writer,
            request,
            handle,
        }
    }

    /// Series name used in logs and the output file name
    pub fn series(&self) -> &str {
        &self.handle.name
    }

    pub fn request(&self) -> &SeriesRequest {
        &self.request
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn status(&self) -> Arc<TaskStatus> {
        Arc::clone(&self.status)
    }

    pub fn exception_count(&self) -> u32 {
        self.exception_count
    }

    /// Fetch and write pages until the range is exhausted or the task fails
    ///
    /// The writer is closed and the status flag set on every exit path.
    pub async fn run(&mut self, historian: &dyn Historian) -> Result<TaskReport> {
        let outcome = self.drive(historian).await;
        let closed = self.writer.close();
        self.state = TaskState::Closed;
        self.status.close();

        outcome?;
        closed.map_err(|source| self.output_error(source))?;

        debug!(
            series = %self.handle.name,
            pages = self.pages,
            rows = self.writer.rows_written(),
            "Retrieval task closed"
        );
        Ok(TaskReport {
            series: self.handle.name.clone(),
            pages: self.pages,
            rows_written: self.writer.rows_written(),
            files_opened: self.writer.files_opened(),
            retries: self.exception_count,
        })
    }

    async fn drive(&mut self, historian: &dyn Historian) -> Result<()> {
        loop {
            self.state = TaskState::FetchPending;
            let query = self.next_query();
            let fetched = self.fetch(historian, &query).await;
            self.state = TaskState::Processing;

            let page = match fetched {
                Ok(page) => page,
                Err(HistorianError::Timeout(message)) => {
                    self.exception_count += 1;
                    if !self.retry.allows(self.exception_count) {
                        return Err(Error::RetryBudgetExhausted {
                            series: self.handle.name.clone(),
                            attempts: self.exception_count,
                        });
                    }
                    let delay = self.retry.delay_for(self.exception_count);
                    warn!(
                        series = %self.handle.name,
                        attempt = self.exception_count,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Page request timed out, retrying same window"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    continue;
                }
                Err(source) => {
                    return Err(Error::Historian {
                        series: self.handle.name.clone(),
                        source,
                    })
                }
            };

            self.pages += 1;
            let written = self.write_page(&page)?;
            let (start, end) = query.window();
            info!(
                page = self.pages,
                start = %start,
                end = %end,
                rows = page.len(),
                written,
                series = %self.handle.name,
                "Retrieved page"
            );

            match query {
                PageQuery::Recorded { max_count, .. } => {
                    if page.len() < max_count {
                        return Ok(());
                    }
                    self.cursor.advance(&page);
                }
                PageQuery::Interpolated { end, last, .. } => {
                    if last {
                        return Ok(());
                    }
                    let before = self.cursor.next_start();
                    self.cursor.advance(&page);
                    if self.cursor.next_start() <= before {
                        self.cursor.jump_to(end);
                    }
                }
            }
        }
    }

    fn next_query(&self) -> PageQuery {
        let start = self.cursor.next_start();
        match self.sampling {
            Sampling::Recorded => PageQuery::Recorded {
                start,
                end: self.request.end,
                max_count: self.cursor.request_size(),
            },
            Sampling::Interpolated { interval } => {
                let end = window_end(start, interval, self.cursor.page_size(), self.request.end);
                PageQuery::Interpolated {
                    start,
                    end,
                    interval,
                    last: end >= self.request.end,
                }
            }
        }
    }

    async fn fetch(
        &self,
        historian: &dyn Historian,
        query: &PageQuery,
    ) -> std::result::Result<Vec<Sample>, HistorianError> {
        match *query {
            PageQuery::Recorded {
                start,
                end,
                max_count,
            } => historian.recorded_page(&self.handle, start, end, max_count).await,
            PageQuery::Interpolated {
                start,
                end,
                interval,
                ..
            } => {
                historian
                    .interpolated_page(&self.handle, start, end, interval)
                    .await
            }
        }
    }

    /// Write the rows not yet emitted and flush; returns the number written
    fn write_page(&mut self, page: &[Sample]) -> Result<usize> {
        let fresh = self.cursor.fresh(page);
        for sample in fresh {
            let value = match &self.handle.conversion {
                Some(conversion) => conversion.apply(sample),
                None => sample.value.clone(),
            };
            self.writer
                .write_row(sample.timestamp, &value)
                .map_err(|source| self.output_error(source))?;
        }
        self.writer
            .flush()
            .map_err(|source| self.output_error(source))?;
        Ok(fresh.len())
    }

    fn output_error(&self, source: anyhow::Error) -> Error {
        Error::Output {
            series: self.handle.name.clone(),
            source,
        }
    }
}

/// `min(start + page_size * interval, end)`; a window that cannot grow
/// covers the rest of the range
fn window_end(
    start: DateTime<Utc>,
    interval: Duration,
    page_size: usize,
    end: DateTime<Utc>,
) -> DateTime<Utc> {
    let span = chrono::Duration::from_std(interval)
        .ok()
        .and_then(|step| step.checked_mul(i32::try_from(page_size).unwrap_or(i32::MAX)))
        .filter(|span| *span > chrono::Duration::zero());

    match span.and_then(|span| start.checked_add_signed(span)) {
        Some(candidate) if candidate < end => candidate,
        _ => end,
    }
}
