//! Common test utilities

use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;

use histpull::historian::SeriesHandle;
use histpull::models::{Sample, SeriesRequest};
use histpull::retrieval::{RetrievalTask, TaskOptions};
use histpull::storage::TimeResolution;
use histpull::utils::retry::RetryPolicy;

/// UTC timestamp at whole minutes
pub fn ts(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

/// Options with zero retry delays so timeout tests run instantly
pub fn fast_options(output_dir: &Path, page_size: usize, resolution: TimeResolution) -> TaskOptions {
    TaskOptions {
        page_size,
        output_dir: output_dir.to_path_buf(),
        resolution,
        retry: RetryPolicy::immediate(10),
    }
}

/// `count` good samples one hour apart starting at `start`, valued 0, 1, 2, ...
#[allow(dead_code)]
pub fn hourly(start: DateTime<Utc>, count: usize) -> Vec<Sample> {
    (0..count)
        .map(|i| Sample::number(start + chrono::Duration::hours(i as i64), i as f64))
        .collect()
}

/// Recorded task for `series` over `[start, end]`
#[allow(dead_code)]
pub fn recorded_task(
    series: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    options: &TaskOptions,
) -> RetrievalTask {
    let request = SeriesRequest {
        line: 1,
        series: series.to_string(),
        start,
        end,
        interval: None,
    };
    RetrievalTask::new(request, SeriesHandle::new(series, series), options)
}

/// Lines of an output file, empty when the file does not exist
#[allow(dead_code)]
pub fn read_rows(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|content| content.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
