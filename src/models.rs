// Core data structures for histpull

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// One value returned by the historian
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleValue {
    /// Numeric reading
    Number(f64),
    /// Digital or system state (e.g. "Shutdown", "Bad Input")
    State(String),
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::State(s) => f.write_str(s),
        }
    }
}

/// Time-stamped row of a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: SampleValue,
    /// Quality flag as reported by the historian
    pub good: bool,
    /// Engineering unit of `value`, empty when unknown
    pub unit: String,
}

impl Sample {
    /// Good numeric sample without a unit
    pub fn number(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value: SampleValue::Number(value),
            good: true,
            unit: String::new(),
        }
    }

    /// Builder-style unit setter
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Builder-style quality setter
    pub fn with_good(mut self, good: bool) -> Self {
        self.good = good;
        self
    }
}

/// One bounded batch of rows, ascending by timestamp (duplicates allowed)
pub type Page = Vec<Sample>;

/// Affine conversion from a series' native unit into its target unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub from: String,
    pub to: String,
    pub factor: f64,
    #[serde(default)]
    pub offset: f64,
}

impl UnitConversion {
    /// Convert `value` if the sample is good and carries the source unit
    ///
    /// Samples without a unit are taken to be in the source unit. Any other
    /// unit, the target included, is written unchanged.
    pub fn apply(&self, sample: &Sample) -> SampleValue {
        match &sample.value {
            SampleValue::Number(v) if sample.good && self.converts(&sample.unit) => {
                SampleValue::Number(v * self.factor + self.offset)
            }
            other => other.clone(),
        }
    }

    fn converts(&self, unit: &str) -> bool {
        unit.is_empty() || unit == self.from
    }
}

/// How values of a series are sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampling {
    /// Raw archived values, paged by row count
    Recorded,
    /// Values interpolated at a fixed interval, paged by time window
    Interpolated { interval: Duration },
}

/// Where series names are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesKind {
    /// PI point names on the data server
    Tag,
    /// Asset framework attribute paths, values converted to the default unit
    Attribute,
}

/// Mode selector of a retrieval run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetrievalMode {
    RecordedTag,
    InterpolatedTag,
    RecordedAttribute,
    InterpolatedAttribute,
}

impl RetrievalMode {
    /// Get all modes
    pub fn all() -> [Self; 4] {
        [
            Self::RecordedTag,
            Self::InterpolatedTag,
            Self::RecordedAttribute,
            Self::InterpolatedAttribute,
        ]
    }

    pub fn kind(&self) -> SeriesKind {
        match self {
            Self::RecordedTag | Self::InterpolatedTag => SeriesKind::Tag,
            Self::RecordedAttribute | Self::InterpolatedAttribute => SeriesKind::Attribute,
        }
    }

    pub fn is_interpolated(&self) -> bool {
        matches!(self, Self::InterpolatedTag | Self::InterpolatedAttribute)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordedTag => "RecordedTag",
            Self::InterpolatedTag => "InterpolatedTag",
            Self::RecordedAttribute => "RecordedAttribute",
            Self::InterpolatedAttribute => "InterpolatedAttribute",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown mode '{s}': expected RecordedTag, InterpolatedTag, \
                     RecordedAttribute or InterpolatedAttribute"
                )
            })
    }
}

/// One parsed line of the request file
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRequest {
    /// 1-based line number in the request file
    pub line: usize,
    pub series: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Present only for interpolated retrieval
    pub interval: Option<Duration>,
}

impl SeriesRequest {
    pub fn sampling(&self) -> Sampling {
        match self.interval {
            Some(interval) => Sampling::Interpolated { interval },
            None => Sampling::Recorded,
        }
    }
}
