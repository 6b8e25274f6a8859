//! Output storage
//!
//! Rows are stored as plain `timestamp,value` text files, one per series per
//! date partition:
//!
//! ```text
//! <output_dir>/<fragment>/<series>
//! ```
//!
//! - [`partition`] - Timestamp to directory fragment mapping
//! - [`writer`] - Per-series writer that rotates files between partitions

pub mod partition;
pub mod writer;

pub use partition::TimeResolution;
pub use writer::{format_timestamp, OutputPartitionWriter};
