use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use histpull::config::Config;
use histpull::models::RetrievalMode;
use histpull::scheduler::SchedulerStrategy;

mod commands;

#[derive(Parser)]
#[command(
    name = "histpull",
    version,
    about = "Bulk extraction of recorded and interpolated historian data",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve every series listed in a request file
    Retrieve {
        /// Retrieval mode (RecordedTag, InterpolatedTag, RecordedAttribute, InterpolatedAttribute)
        #[arg(short = 'i', long)]
        mode: Option<RetrievalMode>,

        /// Request file: one `series,start,end[,intervalSeconds]` per line
        #[arg(short = 'f', long)]
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum number of tasks in flight
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Output partitioning (none, day, month, year, year:N)
        #[arg(short = 't', long)]
        time_resolution: Option<String>,

        /// Years per file when partitioning by year (default 100)
        #[arg(short = 'y', long)]
        years: Option<u32>,

        /// Rows requested per page
        #[arg(short = 's', long)]
        page_size: Option<usize>,

        /// Scheduling strategy (dynamic, static)
        #[arg(long)]
        strategy: Option<SchedulerStrategy>,
    },

    /// Write the path of every tag on the data server to a file
    ListTags {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write every attribute of an asset database to a file
    ListAttributes {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Asset database; every database when unset
        #[arg(short, long)]
        database: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if let Some(file) = cli.log_file {
        config.logging.file = Some(file);
    }

    setup_tracing(
        &config.logging.level,
        &config.logging.format,
        config.logging.file.as_deref(),
        cli.verbose,
    )?;

    tracing::info!("histpull starting");

    match cli.command {
        Commands::Retrieve {
            mode,
            input,
            output,
            parallel,
            time_resolution,
            years,
            page_size,
            strategy,
        } => {
            let retrieval = &mut config.retrieval;
            if let Some(mode) = mode {
                retrieval.mode = mode;
            }
            if let Some(parallel) = parallel {
                retrieval.concurrency = parallel;
            }
            if let Some(resolution) = time_resolution {
                retrieval.time_resolution = resolution;
            }
            if let Some(years) = years {
                retrieval.year_bucket = years;
            }
            if let Some(page_size) = page_size {
                retrieval.page_size = page_size;
            }
            if let Some(strategy) = strategy {
                retrieval.strategy = strategy;
            }
            if let Some(output) = output {
                config.output.directory = output;
            }

            tracing::info!(
                input = %input.display(),
                mode = %config.retrieval.mode,
                concurrency = config.retrieval.concurrency,
                strategy = %config.retrieval.strategy,
                "Starting retrieve command"
            );
            commands::retrieve(config, &input).await?;
        }

        Commands::ListTags { output } => {
            tracing::info!(output = %output.display(), "Starting list-tags command");
            commands::list_tags(config, &output).await?;
        }

        Commands::ListAttributes { output, database } => {
            tracing::info!(
                output = %output.display(),
                database = ?database,
                "Starting list-attributes command"
            );
            commands::list_attributes(config, &output, database).await?;
        }
    }

    Ok(())
}

fn setup_tracing(level: &str, format: &str, file: Option<&Path>, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("histpull=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("histpull={level},warn")))
    };

    let file_layer = match file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match format {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    Ok(())
}
