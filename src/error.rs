//! Unified error handling for histpull
//!
//! Every failure a retrieval run can hit is classified here so the caller can
//! decide whether it is contained at the task boundary or aborts the run.
//!
//! # Architecture
//!
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum
//! - [`HistorianError`] - Failures reported by the historian collaborator
//!
//! # Usage
//!
//! ```rust,ignore
//! use histpull::error::{Error, ErrorCategory};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {err}");
//!     } else if err.category() == ErrorCategory::Config {
//!         eprintln!("Fix the configuration: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::historian::HistorianError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Remote historian errors (timeouts, HTTP, decoding)
    Remote,
    /// Catalog lookups and input request lines
    Loading,
    /// Output files and directories
    Storage,
    /// Configuration and validation errors
    Config,
    /// Task-level failures inside the scheduler
    Task,
}

impl ErrorCategory {
    /// Short human readable name for log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Loading => "loading",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Task => "task",
        }
    }
}

/// Unified error type for histpull
#[derive(Error, Debug)]
pub enum Error {
    /// The historian did not answer in time; the same window may be retried
    #[error("Transient timeout fetching {series}: {message}")]
    TransientTimeout { series: String, message: String },

    /// A task saw more consecutive timeouts than its retry budget allows
    #[error("Too many retries for {series}: {attempts} timeouts")]
    RetryBudgetExhausted { series: String, attempts: u32 },

    /// Catalog lookup found no series with this name
    #[error("Series not found: {0}")]
    SeriesNotFound(String),

    /// The series exists but has no recorded value at or after the start time
    #[error("No recorded data for {series} at or after {start}")]
    NoRecordedData { series: String, start: String },

    /// Time resolution policy could not be parsed
    #[error("Invalid time resolution '{0}': expected none, year, year:N, month or day")]
    InvalidResolution(String),

    /// A line of the request file could not be turned into a request
    #[error("Invalid request on line {line}: {reason}")]
    InvalidRequest { line: usize, reason: String },

    /// Any other historian failure
    #[error("Historian error for {series}")]
    Historian {
        series: String,
        #[source]
        source: HistorianError,
    },

    /// Writing the output files of a series failed
    #[error("Failed to write output for {series}")]
    Output {
        series: String,
        #[source]
        source: anyhow::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// A retrieval task panicked or was aborted
    #[error("Task for {series} did not finish: {reason}")]
    TaskPanicked { series: String, reason: String },

    /// A task returned without marking itself closed
    #[error("Task for {series} returned without closing")]
    TaskNotClosed { series: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid request error for an input line
    pub fn invalid_request(line: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            line,
            reason: reason.into(),
        }
    }

    /// Classify a historian error raised while working on `series`
    pub fn from_historian(series: &str, err: HistorianError) -> Self {
        match err {
            HistorianError::Timeout(message) => Self::TransientTimeout {
                series: series.to_string(),
                message,
            },
            HistorianError::NotFound(name) => Self::SeriesNotFound(name),
            source => Self::Historian {
                series: series.to_string(),
                source,
            },
        }
    }

    /// Message followed by every source in the chain, separated by `: `
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TransientTimeout { .. })
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TransientTimeout { .. } | Self::Historian { .. } => ErrorCategory::Remote,
            Self::SeriesNotFound(_) | Self::NoRecordedData { .. } | Self::InvalidRequest { .. } => {
                ErrorCategory::Loading
            }
            Self::Output { .. } | Self::Io(_) => ErrorCategory::Storage,
            Self::InvalidResolution(_) | Self::Config(_) => ErrorCategory::Config,
            Self::RetryBudgetExhausted { .. }
            | Self::TaskPanicked { .. }
            | Self::TaskNotClosed { .. } => ErrorCategory::Task,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
