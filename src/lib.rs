//! histpull - Bulk extraction of historian time series
//!
//! Pulls recorded or interpolated values for many series from a remote
//! industrial historian into date-partitioned text files, with a hard cap on
//! the number of queries in flight.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`historian`] - Historian collaborator trait, Web API client and in-memory backend
//! - [`loader`] - Request file parsing and series resolution
//! - [`retrieval`] - Page cursor and the per-series retrieval state machine
//! - [`scheduler`] - Bounded-concurrency task scheduling
//! - [`storage`] - Date partitioning and output files
//! - [`models`] - Core data structures and types
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use histpull::config::Config;
//! use histpull::historian::webapi::WebApiHistorian;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let historian = Arc::new(WebApiHistorian::from_config(&config)?);
//!     let summary = histpull::pipeline::run_pipeline(historian, &config, Path::new("tags.csv")).await?;
//!     println!("{} rows written", summary.rows_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod historian;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod scheduler;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::historian::{Historian, HistorianError, SeriesHandle};
    pub use crate::loader::TaskLoader;
    pub use crate::models::{RetrievalMode, Sample, SampleValue, SeriesRequest};
    pub use crate::retrieval::{RetrievalTask, TaskOptions};
    pub use crate::scheduler::{RetrievalScheduler, RunSummary, SchedulerStrategy};
    pub use crate::storage::{OutputPartitionWriter, TimeResolution};
}

// Direct re-exports for convenience
pub use models::{RetrievalMode, Sample, SampleValue};
