//! Configuration management for histpull
//!
//! Settings are layered: a TOML file (or the defaults), then `HISTPULL_*`
//! environment variables, then command-line flags. [`Config::validate`] runs
//! once on the merged result, before any request is loaded.
//!
//! ```toml
//! [historian]
//! base_url = "https://pi.example.com/piwebapi"
//! data_server = "PISRV01"
//!
//! [retrieval]
//! mode = "RecordedTag"
//! page_size = 10000
//! concurrency = 10
//! time_resolution = "month"
//!
//! [output]
//! directory = "./output"
//!
//! [[units]]
//! from = "degF"
//! to = "degC"
//! factor = 0.5555555555555556
//! offset = -17.77777777777778
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::models::{RetrievalMode, SeriesKind, UnitConversion};
use crate::retrieval::TaskOptions;
use crate::scheduler::SchedulerStrategy;
use crate::storage::TimeResolution;
use crate::utils::retry::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote historian connection
    pub historian: HistorianConfig,

    /// Paging, concurrency and retry settings
    pub retrieval: RetrievalConfig,

    /// Output location
    pub output: OutputConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Unit conversions applied to attributes whose source unit differs
    /// from their default unit
    pub units: Vec<UnitConversion>,
}

/// Historian connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorianConfig {
    /// Web API root, e.g. `https://pi.example.com/piwebapi`
    pub base_url: String,

    /// Data archive server holding the tags
    pub data_server: String,

    /// Asset server holding the attribute database
    pub asset_server: String,

    /// Asset database name
    pub database: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Username (optional)
    pub username: Option<String>,

    /// Password (optional)
    pub password: Option<String>,
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://localhost/piwebapi"),
            data_server: String::new(),
            asset_server: String::new(),
            database: String::new(),
            request_timeout_secs: 60,
            username: None,
            password: None,
        }
    }
}

/// Retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Sampling and series kind
    pub mode: RetrievalMode,

    /// Rows (recorded) or intervals (interpolated) per page
    pub page_size: usize,

    /// Maximum number of queries in flight
    pub concurrency: usize,

    /// Output partitioning: none, year, year:N, month or day
    pub time_resolution: String,

    /// Width of a bare `year` partition in years (default 100)
    pub year_bucket: u32,

    /// Scheduling strategy
    pub strategy: SchedulerStrategy,

    /// Timeouts tolerated per task
    pub max_retries: u32,

    /// First retry delay in milliseconds
    pub retry_base_delay_ms: u64,

    /// Retry delay cap in milliseconds
    pub retry_max_delay_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::RecordedTag,
            page_size: 10_000,
            concurrency: 10,
            time_resolution: String::from("none"),
            year_bucket: 100,
            strategy: SchedulerStrategy::Dynamic,
            max_retries: 10,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory of the partitioned files
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./output"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Also append log lines to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
            file: None,
        }
    }
}

impl Config {
    /// Load the file at `path`, or the defaults, then apply the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Override settings from `HISTPULL_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    /// Override settings from any variable source
    pub fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(
            var: &impl Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            var(name).and_then(|v| v.trim().parse::<T>().ok())
        }

        if let Some(v) = var("HISTPULL_BASE_URL") {
            self.historian.base_url = v;
        }
        if let Some(v) = var("HISTPULL_DATA_SERVER") {
            self.historian.data_server = v;
        }
        if let Some(v) = var("HISTPULL_ASSET_SERVER") {
            self.historian.asset_server = v;
        }
        if let Some(v) = var("HISTPULL_DATABASE") {
            self.historian.database = v;
        }
        if let Some(v) = parsed(&var, "HISTPULL_REQUEST_TIMEOUT") {
            self.historian.request_timeout_secs = v;
        }
        if let Some(v) = var("HISTPULL_USERNAME") {
            self.historian.username = Some(v);
        }
        if let Some(v) = var("HISTPULL_PASSWORD") {
            self.historian.password = Some(v);
        }

        if let Some(v) = parsed(&var, "HISTPULL_MODE") {
            self.retrieval.mode = v;
        }
        if let Some(v) = parsed(&var, "HISTPULL_PAGE_SIZE") {
            self.retrieval.page_size = v;
        }
        if let Some(v) = parsed(&var, "HISTPULL_CONCURRENCY") {
            self.retrieval.concurrency = v;
        }
        if let Some(v) = var("HISTPULL_TIME_RESOLUTION") {
            self.retrieval.time_resolution = v;
        }
        if let Some(v) = parsed(&var, "HISTPULL_YEAR_BUCKET") {
            self.retrieval.year_bucket = v;
        }
        if let Some(v) = parsed(&var, "HISTPULL_STRATEGY") {
            self.retrieval.strategy = v;
        }
        if let Some(v) = parsed(&var, "HISTPULL_MAX_RETRIES") {
            self.retrieval.max_retries = v;
        }

        if let Some(v) = var("HISTPULL_OUTPUT_DIR") {
            self.output.directory = PathBuf::from(v);
        }
        if let Some(v) = var("HISTPULL_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("HISTPULL_LOG_FORMAT") {
            self.logging.format = v;
        }
        if let Some(v) = var("HISTPULL_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.retrieval.page_size == 0 {
            return Err(Error::config("page_size must be greater than 0"));
        }

        if self.retrieval.concurrency == 0 {
            return Err(Error::config("concurrency must be greater than 0"));
        }

        if self.retrieval.year_bucket == 0 {
            return Err(Error::config("year_bucket must be greater than 0"));
        }

        self.resolution()?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::config(format!(
                "log format must be text or json, got '{}'",
                self.logging.format
            )));
        }

        if self.historian.base_url.trim().is_empty() {
            return Err(Error::config("historian base_url must be set"));
        }
        url::Url::parse(&self.historian.base_url).map_err(|e| {
            Error::config(format!(
                "invalid historian base_url '{}': {e}",
                self.historian.base_url
            ))
        })?;

        if self.historian.request_timeout_secs == 0 {
            return Err(Error::config("request_timeout_secs must be greater than 0"));
        }

        Ok(())
    }

    /// Check the catalog settings needed to resolve series of `kind`
    pub fn validate_catalog(&self, kind: SeriesKind) -> crate::error::Result<()> {
        match kind {
            SeriesKind::Tag if self.historian.data_server.trim().is_empty() => {
                Err(Error::config("historian data_server must be set for tags"))
            }
            SeriesKind::Attribute
                if self.historian.asset_server.trim().is_empty()
                    || self.historian.database.trim().is_empty() =>
            {
                Err(Error::config(
                    "historian asset_server and database must be set for attributes",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Parsed partitioning policy; a bare `year` uses `year_bucket`
    pub fn resolution(&self) -> crate::error::Result<TimeResolution> {
        let resolution: TimeResolution = self.retrieval.time_resolution.parse()?;
        if self.retrieval.time_resolution.contains(':') {
            Ok(resolution)
        } else {
            resolution.with_year_bucket(self.retrieval.year_bucket)
        }
    }

    /// Retry policy for page requests and catalog lookups
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_delays(
            self.retrieval.max_retries,
            self.retrieval.retry_base_delay_ms,
            self.retrieval.retry_max_delay_ms,
        )
    }

    /// Settings handed to every retrieval task
    pub fn task_options(&self) -> crate::error::Result<TaskOptions> {
        Ok(TaskOptions {
            page_size: self.retrieval.page_size,
            output_dir: self.output.directory.clone(),
            resolution: self.resolution()?,
            retry: self.retry_policy(),
        })
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.historian.request_timeout_secs)
    }
}
