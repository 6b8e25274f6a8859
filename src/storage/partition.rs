//! Date-based output partitioning
//!
//! Maps a sample timestamp to the relative directory its row is written
//! under. The mapping is pure: the same timestamp and policy always produce
//! the same fragment, and later timestamps never map to an earlier fragment.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

/// Output directory layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeResolution {
    /// One file per series for the whole range
    None,
    /// `YYYY`, where the year is floored to a multiple of `bucket_years`
    Year { bucket_years: u32 },
    /// `YYYY/MM`
    Month,
    /// `YYYY/MM/DD`
    Day,
}

impl TimeResolution {
    /// Replace the bucket width of a `year` policy; other policies are unchanged
    pub fn with_year_bucket(self, bucket_years: u32) -> Result<Self, Error> {
        match self {
            Self::Year { .. } if bucket_years == 0 => {
                Err(Error::InvalidResolution("year:0".to_string()))
            }
            Self::Year { .. } => Ok(Self::Year { bucket_years }),
            other => Ok(other),
        }
    }

    /// Relative path fragment for `timestamp`
    pub fn fragment(&self, timestamp: DateTime<Utc>) -> PathBuf {
        match *self {
            Self::None => PathBuf::new(),
            Self::Year { bucket_years } => {
                let bucket = i32::try_from(bucket_years.max(1)).unwrap_or(i32::MAX);
                let year = timestamp.year().div_euclid(bucket) * bucket;
                PathBuf::from(format!("{year:04}"))
            }
            Self::Month => [
                format!("{:04}", timestamp.year()),
                format!("{:02}", timestamp.month()),
            ]
            .iter()
            .collect(),
            Self::Day => [
                format!("{:04}", timestamp.year()),
                format!("{:02}", timestamp.month()),
                format!("{:02}", timestamp.day()),
            ]
            .iter()
            .collect(),
        }
    }
}

impl Default for TimeResolution {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for TimeResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Year { bucket_years: 1 } => f.write_str("year"),
            Self::Year { bucket_years } => write!(f, "year:{bucket_years}"),
            Self::Month => f.write_str("month"),
            Self::Day => f.write_str("day"),
        }
    }
}

impl FromStr for TimeResolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let (tag, width) = match normalized.split_once(':') {
            Some((tag, width)) => (tag, Some(width)),
            None => (normalized.as_str(), None),
        };

        match (tag, width) {
            ("none", None) => Ok(Self::None),
            ("month", None) => Ok(Self::Month),
            ("day", None) => Ok(Self::Day),
            ("year", None) => Ok(Self::Year { bucket_years: 1 }),
            ("year", Some(width)) => match width.trim().parse::<u32>() {
                Ok(bucket_years) if bucket_years > 0 => Ok(Self::Year { bucket_years }),
                _ => Err(Error::InvalidResolution(s.to_string())),
            },
            _ => Err(Error::InvalidResolution(s.to_string())),
        }
    }
}

impl TryFrom<String> for TimeResolution {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeResolution> for String {
    fn from(value: TimeResolution) -> Self {
        value.to_string()
    }
}
