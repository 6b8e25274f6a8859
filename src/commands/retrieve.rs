use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;

use histpull::config::Config;
use histpull::historian::webapi::WebApiHistorian;
use histpull::pipeline::run_pipeline;
use histpull::scheduler::RunSummary;

pub async fn retrieve(config: Config, input: &Path) -> Result<()> {
    println!("Historian Retrieval");
    println!("===================");
    println!("  Mode: {}", config.retrieval.mode);
    println!("  Input: {}", input.display());
    println!("  Output: {}", config.output.directory.display());
    println!("  Concurrency: {}", config.retrieval.concurrency);
    println!("  Strategy: {}", config.retrieval.strategy);
    println!();

    config.validate_catalog(config.retrieval.mode.kind())?;
    let historian = Arc::new(WebApiHistorian::from_config(&config)?);

    let summary = run_pipeline(historian, &config, input).await?;
    print_summary(&summary);

    if !summary.is_success() {
        bail!("{} of {} tasks failed", summary.failed, summary.total);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Retrieval Summary");
    println!("=================");
    println!("  Tasks: {}", summary.total);
    println!("  Completed: {}", summary.completed);
    println!("  Failed: {}", summary.failed);
    println!("  Pages: {}", summary.pages);
    println!("  Rows written: {}", summary.rows_written);
    println!("  Retries: {}", summary.retries);
    println!("  Success rate: {:.1}%", summary.success_rate() * 100.0);
    println!("  Elapsed: {:.1}s", summary.elapsed.as_secs_f64());

    if !summary.failures.is_empty() {
        println!();
        println!("Failures:");
        for failure in &summary.failures {
            println!("  {}: {}", failure.series, failure.error);
        }
    }
}
