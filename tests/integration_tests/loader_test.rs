//! Request file loading against the in-memory historian

use std::sync::Arc;
use std::time::Duration;

use histpull::historian::memory::MemoryHistorian;
use histpull::loader::TaskLoader;
use histpull::models::{RetrievalMode, Sample};
use histpull::storage::TimeResolution;

use super::fixtures::RECORDED_REQUESTS;
use crate::common::{fast_options, hourly, ts};

fn loader(historian: MemoryHistorian, mode: RetrievalMode) -> TaskLoader {
    let options = fast_options(std::path::Path::new("unused"), 100, TimeResolution::None);
    TaskLoader::new(Arc::new(historian), mode, options).with_concurrency(3)
}

#[tokio::test]
async fn test_bad_lines_are_skipped() {
    let historian = MemoryHistorian::new()
        .with_tag("T001", hourly(ts(2020, 1, 1, 0, 0), 3))
        .with_tag("T002", hourly(ts(2020, 1, 1, 0, 0), 3))
        .with_tag("T003", hourly(ts(2020, 1, 1, 0, 0), 3));

    let tasks = loader(historian, RetrievalMode::RecordedTag)
        .load_str(RECORDED_REQUESTS)
        .await;

    // malformed line, reversed range and unknown series are dropped
    let series: Vec<&str> = tasks.iter().map(|t| t.series()).collect();
    assert_eq!(series, vec!["T001", "T002"]);
    assert_eq!(tasks[0].request().line, 2);
    assert_eq!(tasks[1].request().line, 3);
}

#[tokio::test]
async fn test_input_order_is_kept() {
    let names: Vec<String> = (0..20).map(|i| format!("S{i:02}")).collect();
    let historian = names.iter().fold(MemoryHistorian::new(), |h, name| {
        h.with_tag(name, hourly(ts(2020, 1, 1, 0, 0), 1))
    });
    let input: String = names
        .iter()
        .map(|name| format!("{name},2020-01-01,2020-01-02\n"))
        .collect();

    let tasks = loader(historian, RetrievalMode::RecordedTag).load_str(&input).await;

    let loaded: Vec<String> = tasks.iter().map(|t| t.series().to_string()).collect();
    assert_eq!(loaded, names);
}

#[tokio::test]
async fn test_interpolated_start_snaps_to_first_day() {
    let historian = MemoryHistorian::new()
        .with_tag("LATE", vec![Sample::number(ts(2020, 3, 5, 14, 30), 1.0)])
        .with_tag("EXACT", vec![Sample::number(ts(2020, 1, 1, 0, 0), 1.0)])
        .with_tag("SAMEDAY", vec![Sample::number(ts(2020, 1, 1, 8, 0), 1.0)]);
    let input = "\
LATE,2020-01-01,2020-12-31,3600
EXACT,2020-01-01,2020-12-31,3600
SAMEDAY,2020-01-01T06:00:00Z,2020-12-31,3600
";

    let tasks = loader(historian, RetrievalMode::InterpolatedTag)
        .load_str(input)
        .await;

    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[0].request().start, ts(2020, 3, 5, 0, 0));
    assert_eq!(tasks[0].request().interval, Some(Duration::from_secs(3600)));
    // data right at the start leaves it alone
    assert_eq!(tasks[1].request().start, ts(2020, 1, 1, 0, 0));
    // the day boundary is never earlier than the requested start
    assert_eq!(tasks[2].request().start, ts(2020, 1, 1, 6, 0));
}

#[tokio::test]
async fn test_interpolated_without_data_is_skipped() {
    let historian = MemoryHistorian::new()
        .with_tag("EMPTY", Vec::new())
        .with_tag("FULL", hourly(ts(2020, 1, 1, 0, 0), 2));
    let input = "EMPTY,2020-01-01,2020-01-02,60\nFULL,2020-01-01,2020-01-02,60\n";

    let tasks = loader(historian, RetrievalMode::InterpolatedTag)
        .load_str(input)
        .await;

    let series: Vec<&str> = tasks.iter().map(|t| t.series()).collect();
    assert_eq!(series, vec!["FULL"]);
}

#[tokio::test]
async fn test_attribute_mode_resolves_attributes_only() {
    let historian = MemoryHistorian::new()
        .with_tag("T001", hourly(ts(2020, 1, 1, 0, 0), 1))
        .with_attribute("Plant|Flow", hourly(ts(2020, 1, 1, 0, 0), 1), None);
    let input = "T001,2020-01-01,2020-01-02\nPlant|Flow,2020-01-01,2020-01-02\n";

    let tasks = loader(historian, RetrievalMode::RecordedAttribute)
        .load_str(input)
        .await;

    let series: Vec<&str> = tasks.iter().map(|t| t.series()).collect();
    assert_eq!(series, vec!["Plant|Flow"]);
}

#[tokio::test]
async fn test_load_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tags.csv");
    std::fs::write(&path, "T001,2020-01-01,2020-01-02\n").unwrap();
    let historian = MemoryHistorian::new().with_tag("T001", hourly(ts(2020, 1, 1, 0, 0), 1));

    let loader = loader(historian, RetrievalMode::RecordedTag);
    assert_eq!(loader.load_file(&path).await.unwrap().len(), 1);
    assert!(loader.load_file(&dir.path().join("absent.csv")).await.is_err());
}

#[tokio::test]
async fn test_first_value_after_end_is_skipped() {
    let historian = MemoryHistorian::new()
        .with_tag("LATE", vec![Sample::number(ts(2020, 1, 2, 3, 0), 1.0)])
        .with_tag("LATER_SAME_DAY", vec![Sample::number(ts(2020, 1, 1, 8, 0), 1.0)]);
    let input = "\
LATE,2020-01-01 00:00:00,2020-01-01 06:00:00,3600
LATER_SAME_DAY,2020-01-01 00:00:00,2020-01-01 06:00:00,3600
";

    let tasks = loader(historian, RetrievalMode::InterpolatedTag)
        .load_str(input)
        .await;

    // the day start of an 08:00 value still lies inside the range
    let series: Vec<&str> = tasks.iter().map(|t| t.series()).collect();
    assert_eq!(series, vec!["LATER_SAME_DAY"]);
    assert!(tasks.iter().all(|t| t.request().start <= t.request().end));
}

#[tokio::test]
async fn test_lookups_respect_concurrency() {
    let names: Vec<String> = (0..12).map(|i| format!("S{i:02}")).collect();
    let historian = names.iter().fold(MemoryHistorian::new(), |h, name| {
        h.with_tag(name, hourly(ts(2020, 1, 1, 0, 0), 2))
    });
    let historian = Arc::new(historian.with_lookup_latency(Duration::from_millis(10)));
    let input: String = names
        .iter()
        .map(|name| format!("{name},2020-01-01,2020-01-02,3600\n"))
        .collect();

    let options = fast_options(std::path::Path::new("unused"), 100, TimeResolution::None);
    let tasks = TaskLoader::new(historian.clone(), RetrievalMode::InterpolatedTag, options)
        .with_concurrency(3)
        .load_str(&input)
        .await;

    assert_eq!(tasks.len(), 12);
    assert_eq!(historian.max_lookups_in_flight(), 3);
    assert_eq!(historian.max_in_flight(), 0);
}
