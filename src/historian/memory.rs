//! In-memory historian
//!
//! Serves series from memory with the paging semantics of a real archive.
//! Faults can be scripted per series, every page request is recorded, and the
//! highest number of concurrently running page queries and catalog lookups
//! is tracked so callers can verify admission control.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Historian, HistorianError, SeriesHandle};
use crate::models::{Page, Sample, SampleValue, SeriesKind, UnitConversion};

/// Scripted failure for the next page request of a series
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Answer with [`HistorianError::Timeout`]
    Timeout,
    /// Answer with a non-retryable server error
    Error(String),
}

/// One page request as seen by the historian
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub series: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `Some` for recorded requests
    pub max_count: Option<usize>,
    /// `Some` for interpolated requests
    pub interval: Option<Duration>,
}

#[derive(Debug, Default)]
struct StoredSeries {
    kind: Option<SeriesKind>,
    samples: Vec<Sample>,
    conversion: Option<UnitConversion>,
}

/// Historian backed by in-memory sample vectors
#[derive(Debug, Default)]
pub struct MemoryHistorian {
    series: Mutex<HashMap<String, StoredSeries>>,
    faults: Mutex<HashMap<String, VecDeque<Fault>>>,
    requests: Mutex<Vec<PageRequest>>,
    latency: Mutex<Duration>,
    lookup_latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    lookups_in_flight: AtomicUsize,
    max_lookups_in_flight: AtomicUsize,
}

impl MemoryHistorian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag; samples are sorted by timestamp (stable)
    pub fn with_tag(self, name: &str, samples: Vec<Sample>) -> Self {
        self.insert(name, SeriesKind::Tag, samples, None);
        self
    }

    /// Register an attribute with an optional resolved unit conversion
    pub fn with_attribute(
        self,
        path: &str,
        samples: Vec<Sample>,
        conversion: Option<UnitConversion>,
    ) -> Self {
        self.insert(path, SeriesKind::Attribute, samples, conversion);
        self
    }

    /// Delay applied to every page request
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.latency) = latency;
        self
    }

    /// Delay applied to every catalog lookup and first-value query
    pub fn with_lookup_latency(self, latency: Duration) -> Self {
        *lock(&self.lookup_latency) = latency;
        self
    }

    /// Queue `count` faults for the next page requests of `series`
    pub fn fail_next(&self, series: &str, fault: Fault, count: usize) {
        let mut faults = lock(&self.faults);
        let queue = faults.entry(series.to_string()).or_default();
        queue.extend(std::iter::repeat(fault).take(count));
    }

    /// All page requests received so far, in arrival order
    pub fn requests(&self) -> Vec<PageRequest> {
        lock(&self.requests).clone()
    }

    /// Page requests received for one series
    pub fn requests_for(&self, series: &str) -> Vec<PageRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.series == series)
            .cloned()
            .collect()
    }

    /// Highest number of page requests that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of lookups (tag, attribute, first value) running at
    /// the same time
    pub fn max_lookups_in_flight(&self) -> usize {
        self.max_lookups_in_flight.load(Ordering::SeqCst)
    }

    fn insert(
        &self,
        name: &str,
        kind: SeriesKind,
        mut samples: Vec<Sample>,
        conversion: Option<UnitConversion>,
    ) {
        samples.sort_by_key(|s| s.timestamp);
        lock(&self.series).insert(
            name.to_string(),
            StoredSeries {
                kind: Some(kind),
                samples,
                conversion,
            },
        );
    }

    fn resolve(&self, name: &str, kind: SeriesKind) -> Result<SeriesHandle, HistorianError> {
        let series = lock(&self.series);
        match series.get(name) {
            Some(stored) if stored.kind == Some(kind) => Ok(SeriesHandle {
                id: name.to_string(),
                name: name.to_string(),
                conversion: stored.conversion.clone(),
            }),
            _ => Err(HistorianError::NotFound(name.to_string())),
        }
    }

    /// Record the request, wait out the latency and consume a scripted fault
    async fn begin(&self, request: PageRequest) -> Result<InFlight<'_>, HistorianError> {
        let series = request.series.clone();
        lock(&self.requests).push(request);

        let guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let fault = lock(&self.faults)
            .get_mut(&series)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(Fault::Timeout) => Err(HistorianError::Timeout(format!(
                "scripted timeout for {series}"
            ))),
            Some(Fault::Error(body)) => Err(HistorianError::Status { code: 500, body }),
            None => Ok(guard),
        }
    }

    /// Hold a lookup slot for the configured lookup latency
    async fn lookup(&self) -> InFlight<'_> {
        let guard = InFlight::enter(&self.lookups_in_flight, &self.max_lookups_in_flight);
        let latency = *lock(&self.lookup_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn samples(&self, id: &str) -> Result<Vec<Sample>, HistorianError> {
        lock(&self.series)
            .get(id)
            .map(|s| s.samples.clone())
            .ok_or_else(|| HistorianError::NotFound(id.to_string()))
    }
}

/// Tracks one running request for an in-flight high-water mark
struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, high_water: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        high_water.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Linear interpolation between the recorded neighbours of `at`
fn interpolate(samples: &[Sample], at: DateTime<Utc>) -> Sample {
    let after = samples.partition_point(|s| s.timestamp < at);
    if let Some(exact) = samples.get(after).filter(|s| s.timestamp == at) {
        return Sample {
            timestamp: at,
            ..exact.clone()
        };
    }
    let before = after.checked_sub(1).and_then(|i| samples.get(i));
    match (before, samples.get(after)) {
        (Some(a), Some(b)) => match (&a.value, &b.value) {
            (SampleValue::Number(va), SampleValue::Number(vb)) => {
                let span = (b.timestamp - a.timestamp).num_milliseconds() as f64;
                let offset = (at - a.timestamp).num_milliseconds() as f64;
                let value = if span > 0.0 {
                    va + (vb - va) * offset / span
                } else {
                    *va
                };
                Sample {
                    timestamp: at,
                    value: SampleValue::Number(value),
                    good: a.good && b.good,
                    unit: a.unit.clone(),
                }
            }
            _ => Sample {
                timestamp: at,
                ..a.clone()
            },
        },
        (Some(last), None) => Sample {
            timestamp: at,
            ..last.clone()
        },
        _ => Sample {
            timestamp: at,
            value: SampleValue::State("No Data".to_string()),
            good: false,
            unit: String::new(),
        },
    }
}

#[async_trait]
impl Historian for MemoryHistorian {
    async fn resolve_tag(&self, name: &str) -> Result<SeriesHandle, HistorianError> {
        let _guard = self.lookup().await;
        self.resolve(name, SeriesKind::Tag)
    }

    async fn resolve_attribute(&self, path: &str) -> Result<SeriesHandle, HistorianError> {
        let _guard = self.lookup().await;
        self.resolve(path, SeriesKind::Attribute)
    }

    async fn recorded_page(
        &self,
        series: &SeriesHandle,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Page, HistorianError> {
        let _guard = self
            .begin(PageRequest {
                series: series.id.clone(),
                start,
                end,
                max_count: Some(max_count),
                interval: None,
            })
            .await?;

        Ok(self
            .samples(&series.id)?
            .into_iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .take(max_count)
            .collect())
    }

    async fn interpolated_page(
        &self,
        series: &SeriesHandle,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Page, HistorianError> {
        let _guard = self
            .begin(PageRequest {
                series: series.id.clone(),
                start,
                end,
                max_count: None,
                interval: Some(interval),
            })
            .await?;

        let step = chrono::Duration::from_std(interval)
            .map_err(|e| HistorianError::Decode(format!("invalid interval: {e}")))?;
        if step <= chrono::Duration::zero() {
            return Err(HistorianError::Decode("interval must be positive".into()));
        }

        let samples = self.samples(&series.id)?;
        let mut page = Vec::new();
        let mut at = start;
        while at <= end {
            page.push(interpolate(&samples, at));
            at += step;
        }
        Ok(page)
    }

    async fn first_recorded_after(
        &self,
        series: &SeriesHandle,
        start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, HistorianError> {
        let _guard = self.lookup().await;
        Ok(self
            .samples(&series.id)?
            .iter()
            .map(|s| s.timestamp)
            .find(|ts| *ts >= start))
    }
}
