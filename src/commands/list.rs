use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use histpull::config::Config;
use histpull::historian::webapi::WebApiHistorian;
use histpull::models::SeriesKind;

pub async fn list_tags(config: Config, output: &Path) -> Result<()> {
    config.validate_catalog(SeriesKind::Tag)?;
    let historian = WebApiHistorian::from_config(&config)?;

    println!("Listing tags on {}", config.historian.data_server);
    let tags = historian
        .list_tags()
        .await
        .context("Failed to list tags")?;

    let count = write_lines(output, tags)?;
    println!("  {count} tags written to {}", output.display());
    Ok(())
}

pub async fn list_attributes(config: Config, output: &Path, database: Option<String>) -> Result<()> {
    if config.historian.asset_server.trim().is_empty() {
        bail!("historian asset_server must be set to list attributes");
    }
    let database = database.unwrap_or_else(|| config.historian.database.clone());
    let historian = WebApiHistorian::from_config(&config)?;

    if !database.trim().is_empty() {
        return list_database(&historian, &database, output).await;
    }

    println!("Listing databases on {}", config.historian.asset_server);
    let databases = historian
        .list_databases()
        .await
        .context("Failed to list asset databases")?;
    if databases.is_empty() {
        println!("  No databases found");
        return Ok(());
    }

    for name in &databases {
        list_database(&historian, name, &database_output(output, name)).await?;
    }
    Ok(())
}

async fn list_database(historian: &WebApiHistorian, database: &str, output: &Path) -> Result<()> {
    println!("Listing attributes in {database}");
    let listings = historian
        .list_attributes(database)
        .await
        .with_context(|| format!("Failed to list attributes in {database}"))?;

    let count = write_lines(output, listings.iter().map(|l| l.line()))?;
    println!("  {count} attributes written to {}", output.display());
    Ok(())
}

/// `attributes.csv` for database `Plant` becomes `attributes Plant.csv`
fn database_output(output: &Path, database: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let database = histpull::utils::sanitize_filename(database);
    let name = match output.extension() {
        Some(ext) => format!("{stem} {database}.{}", ext.to_string_lossy()),
        None => format!("{stem} {database}"),
    };
    output.with_file_name(name)
}

fn write_lines(path: &Path, lines: impl IntoIterator<Item = String>) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut count = 0;
    for line in lines {
        writeln!(writer, "{line}")?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}
