//! Request file loading
//!
//! Turns the lines of a request file into ready-to-run [`RetrievalTask`]s.
//! Each line is `series,start,end[,intervalSeconds]`. Blank lines and lines
//! starting with `#` are ignored. A line that cannot be parsed or resolved is
//! logged and skipped; it never stops the remaining lines from loading.

use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::historian::{Historian, HistorianError, SeriesHandle};
use crate::models::{RetrievalMode, SeriesKind, SeriesRequest};
use crate::retrieval::{RetrievalTask, TaskOptions};
use crate::utils::retry::{with_retry_if, RetryPolicy};
use crate::utils::{parse_timestamp, start_of_day};

/// Builds retrieval tasks from request lines
pub struct TaskLoader {
    historian: Arc<dyn Historian>,
    mode: RetrievalMode,
    options: TaskOptions,
    concurrency: usize,
    lookup_retry: RetryPolicy,
}

impl TaskLoader {
    pub fn new(historian: Arc<dyn Historian>, mode: RetrievalMode, options: TaskOptions) -> Self {
        let lookup_retry = options.retry.clone();
        Self {
            historian,
            mode,
            options,
            concurrency: 10,
            lookup_retry,
        }
    }

    /// Maximum number of catalog lookups in flight
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    /// Load every valid line of the request file at `path`
    pub async fn load_file(&self, path: &Path) -> Result<Vec<RetrievalTask>> {
        let input = tokio::fs::read_to_string(path).await?;
        tracing::info!(path = %path.display(), mode = %self.mode, "Loading request file");
        Ok(self.load_str(&input).await)
    }

    /// Load every valid line of `input`, keeping input order
    pub async fn load_str(&self, input: &str) -> Vec<RetrievalTask> {
        let requests: Vec<SeriesRequest> = input
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                match parse_request(index + 1, line, self.mode) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping request line");
                        None
                    }
                }
            })
            .collect();

        let mut loaded: Vec<(usize, RetrievalTask)> = stream::iter(requests)
            .map(|request| async move {
                let line = request.line;
                let series = request.series.clone();
                match self.build_task(request).await {
                    Ok(task) => Some((line, task)),
                    Err(e) => {
                        tracing::warn!(line, series = %series, error = %e.report(), "Skipping series");
                        None
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|task| async move { task })
            .collect()
            .await;

        loaded.sort_by_key(|(line, _)| *line);
        tracing::info!(tasks = loaded.len(), "Loaded retrieval tasks");
        loaded.into_iter().map(|(_, task)| task).collect()
    }

    /// Resolve the series and build its task
    async fn build_task(&self, mut request: SeriesRequest) -> Result<RetrievalTask> {
        let handle = self.resolve(&request.series).await?;

        if let Some(interval) = request.interval {
            request.start = self.snap_start(&request, &handle).await?;
            tracing::info!(
                start = %request.start,
                interval_secs = interval.as_secs(),
                end = %request.end,
                series = %request.series,
                "Loaded interpolated request"
            );
        } else {
            tracing::info!(
                start = %request.start,
                end = %request.end,
                series = %request.series,
                "Loaded recorded request"
            );
        }

        Ok(RetrievalTask::new(request, handle, &self.options))
    }

    async fn resolve(&self, name: &str) -> Result<SeriesHandle> {
        let historian = self.historian.as_ref();
        let kind = self.mode.kind();
        with_retry_if(
            &self.lookup_retry,
            || async move {
                match kind {
                    SeriesKind::Tag => historian.resolve_tag(name).await,
                    SeriesKind::Attribute => historian.resolve_attribute(name).await,
                }
            },
            HistorianError::is_timeout,
        )
        .await
        .map_err(|e| match e {
            HistorianError::NotFound(_) => Error::SeriesNotFound(name.to_string()),
            other => Error::from_historian(name, other),
        })
    }

    /// Start of the day holding the first recorded value, when that value is
    /// later than the requested start
    ///
    /// A series whose first value lands after the requested end has nothing
    /// to interpolate and is rejected with [`Error::NoRecordedData`].
    async fn snap_start(
        &self,
        request: &SeriesRequest,
        handle: &SeriesHandle,
    ) -> Result<chrono::DateTime<chrono::Utc>> {
        let historian = self.historian.as_ref();
        let first = with_retry_if(
            &self.lookup_retry,
            || historian.first_recorded_after(handle, request.start),
            HistorianError::is_timeout,
        )
        .await
        .map_err(|e| Error::from_historian(&request.series, e))?;

        let snapped = first.map(|first| {
            if first > request.start {
                start_of_day(first).max(request.start)
            } else {
                request.start
            }
        });
        match snapped {
            Some(start) if start <= request.end => Ok(start),
            _ => Err(Error::NoRecordedData {
                series: request.series.clone(),
                start: request.start.to_rfc3339(),
            }),
        }
    }
}

/// Parse one request line
///
/// Returns `Ok(None)` for blank and comment lines.
pub fn parse_request(line: usize, text: &str, mode: RetrievalMode) -> Result<Option<SeriesRequest>> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = text.split(',').map(str::trim).collect();
    if fields.len() < 3 || fields.len() > 4 {
        return Err(Error::invalid_request(
            line,
            format!("expected series,start,end[,intervalSeconds], got {} fields", fields.len()),
        ));
    }

    let series = fields[0];
    if series.is_empty() {
        return Err(Error::invalid_request(line, "empty series name"));
    }

    let start = parse_timestamp(fields[1])
        .ok_or_else(|| Error::invalid_request(line, format!("invalid start time '{}'", fields[1])))?;
    let end = parse_timestamp(fields[2])
        .ok_or_else(|| Error::invalid_request(line, format!("invalid end time '{}'", fields[2])))?;
    if end < start {
        return Err(Error::invalid_request(line, "end time is before start time"));
    }

    let interval = match (mode.is_interpolated(), fields.get(3)) {
        (true, Some(raw)) => Some(parse_interval(line, raw)?),
        (true, None) => {
            return Err(Error::invalid_request(
                line,
                format!("{mode} requires an interval in seconds"),
            ))
        }
        (false, Some(raw)) => {
            tracing::warn!(line, interval = *raw, mode = %mode, "Ignoring interval in recorded mode");
            None
        }
        (false, None) => None,
    };

    Ok(Some(SeriesRequest {
        line,
        series: series.to_string(),
        start,
        end,
        interval,
    }))
}

fn parse_interval(line: usize, raw: &str) -> Result<Duration> {
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(Error::invalid_request(
            line,
            format!("invalid interval '{raw}': expected a positive number of seconds"),
        )),
    }
}
