//! Paginated retrieval of a single series
//!
//! - [`cursor`] - Page cursor and boundary deduplication
//! - [`task`] - Fetch/process state machine that owns the output writer

pub mod cursor;
pub mod task;

pub use cursor::PageCursor;
pub use task::{RetrievalTask, TaskOptions, TaskReport, TaskState, TaskStatus};
