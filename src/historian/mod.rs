//! Historian collaborator
//!
//! The retrieval core never talks to a concrete server. It is handed an
//! `Arc<dyn Historian>` that resolves series names and answers page queries.
//!
//! - [`webapi`] - PI Web API style REST client built on reqwest
//! - [`memory`] - In-memory historian with fault injection, used by tests

pub mod memory;
pub mod webapi;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::models::{Page, UnitConversion};

/// Errors reported by a historian implementation
#[derive(Error, Debug)]
pub enum HistorianError {
    /// Request did not complete in time; retryable
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Series, database or server not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server answered with a non-success status
    #[error("Server returned {code}: {body}")]
    Status { code: u16, body: String },

    /// Response could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Transport-level HTTP error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl HistorianError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Queryable handle for one resolved series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesHandle {
    /// Identifier understood by the query primitives (e.g. a WebId)
    pub id: String,
    /// Series name used for logging and the output file name
    pub name: String,
    /// Conversion into the series' target unit, attributes only
    pub conversion: Option<UnitConversion>,
}

impl SeriesHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            conversion: None,
        }
    }
}

/// Catalog and query primitives of a remote historian
#[async_trait]
pub trait Historian: Send + Sync {
    /// Resolve a tag (PI point) name
    async fn resolve_tag(&self, name: &str) -> Result<SeriesHandle, HistorianError>;

    /// Resolve an attribute path, including the unit conversion to apply
    async fn resolve_attribute(&self, path: &str) -> Result<SeriesHandle, HistorianError>;

    /// Recorded values in `[start, end]`, boundary inside, at most `max_count`
    /// rows, ascending by timestamp
    async fn recorded_page(
        &self,
        series: &SeriesHandle,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Page, HistorianError>;

    /// Values interpolated every `interval` over `[start, end]`
    async fn interpolated_page(
        &self,
        series: &SeriesHandle,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Page, HistorianError>;

    /// Timestamp of the first recorded value at or after `start`
    async fn first_recorded_after(
        &self,
        series: &SeriesHandle,
        start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, HistorianError>;
}
