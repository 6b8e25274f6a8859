//! End-to-end retrieval run
//!
//! ```text
//! request file ──▶ TaskLoader ──▶ [RetrievalTask] ──▶ RetrievalScheduler ──▶ output files
//! ```

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::historian::Historian;
use crate::loader::TaskLoader;
use crate::scheduler::{RetrievalScheduler, RunSummary};

/// Validate `config`, load the requests in `input` and run them
///
/// Configuration problems abort before any request is loaded. Lines that
/// fail to load and tasks that fail to finish are reported, not returned as
/// errors; check [`RunSummary::is_success`].
pub async fn run_pipeline(
    historian: Arc<dyn Historian>,
    config: &Config,
    input: &Path,
) -> Result<RunSummary> {
    config.validate().context("Invalid configuration")?;
    let options = config.task_options()?;

    tokio::fs::create_dir_all(&options.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory: {}",
                options.output_dir.display()
            )
        })?;

    let loader = TaskLoader::new(Arc::clone(&historian), config.retrieval.mode, options)
        .with_concurrency(config.retrieval.concurrency);
    let tasks = loader
        .load_file(input)
        .await
        .with_context(|| format!("Failed to read request file: {}", input.display()))?;

    let scheduler = RetrievalScheduler::new(historian, config.retrieval.concurrency)
        .with_strategy(config.retrieval.strategy);
    Ok(scheduler.run(tasks).await)
}
