//! Partitioned output files for one series
//!
//! A writer keeps at most one file open. Each row picks its partition from
//! the timestamp; when the partition changes the current file is flushed and
//! closed before the next one is created.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::partition::TimeResolution;
use crate::models::SampleValue;
use crate::utils::sanitize_filename;

/// Currently open partition file
#[derive(Debug)]
struct OpenPartition {
    fragment: PathBuf,
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Owns the output stream of one series
#[derive(Debug)]
pub struct OutputPartitionWriter {
    /// Root output directory
    output_dir: PathBuf,

    /// File name shared by every partition of this series
    file_name: String,

    /// Partitioning policy
    resolution: TimeResolution,

    current: Option<OpenPartition>,
    rows_written: u64,
    files_opened: u64,
}

impl OutputPartitionWriter {
    /// Create a writer for `series`; nothing is opened until the first row
    pub fn new(output_dir: &Path, series: &str, resolution: TimeResolution) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            file_name: sanitize_filename(series),
            resolution,
            current: None,
            rows_written: 0,
            files_opened: 0,
        }
    }

    /// Append one `timestamp,value` line, rotating the file if needed
    pub fn write_row(&mut self, timestamp: DateTime<Utc>, value: &SampleValue) -> Result<()> {
        let fragment = self.resolution.fragment(timestamp);
        let open = match self.current.take() {
            Some(open) if open.fragment == fragment => open,
            previous => {
                if let Some(previous) = previous {
                    Self::finish(previous)?;
                }
                self.open(fragment)?
            }
        };
        let open = self.current.insert(open);

        writeln!(open.writer, "{},{}", format_timestamp(timestamp), value)
            .with_context(|| format!("Failed to write to file: {}", open.path.display()))?;
        self.rows_written += 1;
        Ok(())
    }

    /// Push buffered rows to the operating system
    pub fn flush(&mut self) -> Result<()> {
        if let Some(open) = self.current.as_mut() {
            open.writer
                .flush()
                .with_context(|| format!("Failed to flush file: {}", open.path.display()))?;
        }
        Ok(())
    }

    /// Flush and release the open file, if any
    pub fn close(&mut self) -> Result<()> {
        match self.current.take() {
            Some(open) => Self::finish(open),
            None => Ok(()),
        }
    }

    /// Path of the file currently open
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|open| open.path.as_path())
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Number of partition files created so far
    pub fn files_opened(&self) -> u64 {
        self.files_opened
    }

    fn open(&mut self, fragment: PathBuf) -> Result<OpenPartition> {
        let dir = self.output_dir.join(&fragment);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let path = dir.join(&self.file_name);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Opened output partition");
        self.files_opened += 1;
        Ok(OpenPartition {
            fragment,
            path,
            writer: BufWriter::new(file),
        })
    }

    fn finish(mut open: OpenPartition) -> Result<()> {
        open.writer
            .flush()
            .with_context(|| format!("Failed to flush file: {}", open.path.display()))?;
        tracing::debug!(path = %open.path.display(), "Closed output partition");
        Ok(())
    }
}

/// ISO-8601 UTC with fractional seconds, e.g. `2020-01-01T12:00:00.000000Z`
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}
