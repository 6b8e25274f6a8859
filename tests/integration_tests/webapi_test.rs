//! Web API historian tests using wiremock
//!
//! These tests validate request shapes, response decoding and error
//! classification against a mock server.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use histpull::config::Config;
use histpull::historian::webapi::{AttributeListing, WebApiHistorian};
use histpull::historian::{Historian, HistorianError, SeriesHandle};
use histpull::models::{RetrievalMode, SampleValue, UnitConversion};
use histpull::pipeline::run_pipeline;

use super::fixtures::{attribute, named_items, point, stream};
use crate::common::{read_rows, ts};

fn client(server: &MockServer) -> WebApiHistorian {
    WebApiHistorian::new(&format!("{}/piwebapi", server.uri()), Duration::from_secs(5))
        .unwrap()
        .with_data_server("PISRV01")
        .with_asset_database("AFSRV", "Plant")
}

async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Test tag lookup by full point path
#[tokio::test]
async fn test_resolve_tag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/points"))
        .and(query_param("path", r"\\PISRV01\SINUSOID"))
        .respond_with(ResponseTemplate::new(200).set_body_json(point("P1DP", "SINUSOID", "")))
        .expect(1)
        .mount(&server)
        .await;

    let handle = client(&server).resolve_tag("SINUSOID").await.unwrap();

    assert_eq!(handle.id, "P1DP");
    assert_eq!(handle.name, "SINUSOID");
    assert!(handle.conversion.is_none());
}

/// Test unknown tags map to NotFound with the tag name
#[tokio::test]
async fn test_resolve_tag_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/points"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).resolve_tag("NOPE").await.unwrap_err();
    assert!(matches!(err, HistorianError::NotFound(ref name) if name == "NOPE"), "{err}");
}

/// Test attribute lookup follows the point link and picks the unit conversion
#[tokio::test]
async fn test_resolve_attribute_with_conversion() {
    let server = MockServer::start().await;
    let link = format!("{}/piwebapi/points/P9", server.uri());
    Mock::given(method("GET"))
        .and(path("/piwebapi/attributes"))
        .and(query_param("path", r"\\AFSRV\Plant\Unit1|Temp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(attribute(
            "A1",
            r"\\AFSRV\Plant\Unit1|Temp",
            "degC",
            Some(&link),
        )))
        .mount(&server)
        .await;
    mount_json(&server, "/piwebapi/points/P9", point("P9DP", "TEMP01", "degF")).await;

    let conversion = UnitConversion {
        from: "degF".into(),
        to: "degC".into(),
        factor: 5.0 / 9.0,
        offset: -160.0 / 9.0,
    };
    let historian = client(&server).with_units(vec![conversion.clone()]);

    let handle = historian.resolve_attribute("Unit1|Temp").await.unwrap();

    // values are read from the point stream
    assert_eq!(handle.id, "P9DP");
    assert_eq!(handle.name, "Unit1|Temp");
    assert_eq!(handle.conversion, Some(conversion));
}

/// Test attributes without a point cannot be retrieved
#[tokio::test]
async fn test_resolve_attribute_without_point() {
    let server = MockServer::start().await;
    mount_json(
        &server,
        "/piwebapi/attributes",
        attribute("A2", r"\\AFSRV\Plant\Unit1|Note", "", None),
    )
    .await;

    let err = client(&server).resolve_attribute("Unit1|Note").await.unwrap_err();
    assert!(matches!(err, HistorianError::NotFound(_)), "{err}");
}

/// Test recorded query parameters and decoding
#[tokio::test]
async fn test_recorded_page_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/streams/W1/recorded"))
        .and(query_param("startTime", "2020-01-01T00:00:00.000000Z"))
        .and(query_param("endTime", "2020-01-03T00:00:00.000000Z"))
        .and(query_param("boundaryType", "Inside"))
        .and(query_param("maxCount", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream(&[
            ("2020-01-01T00:00:00Z", 1.0),
            ("2020-01-01T12:00:00Z", 2.5),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let page = client(&server)
        .recorded_page(
            &SeriesHandle::new("W1", "T001"),
            ts(2020, 1, 1, 0, 0),
            ts(2020, 1, 3, 0, 0),
            2,
        )
        .await
        .unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page[1].timestamp, ts(2020, 1, 1, 12, 0));
    assert_eq!(page[1].value, SampleValue::Number(2.5));
}

/// Test interpolated queries send the interval in seconds
#[tokio::test]
async fn test_interpolated_page_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/streams/W1/interpolated"))
        .and(query_param("interval", "3600s"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Items": [
                {"Timestamp": "2020-01-01T00:00:00Z", "Value": {"Name": "Shutdown", "Value": 248}, "Good": false},
                {"Timestamp": "2020-01-01T01:00:00Z", "Value": 7.0, "Good": true}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let page = client(&server)
        .interpolated_page(
            &SeriesHandle::new("W1", "T001"),
            ts(2020, 1, 1, 0, 0),
            ts(2020, 1, 1, 1, 0),
            Duration::from_secs(3600),
        )
        .await
        .unwrap();

    assert_eq!(page[0].value, SampleValue::State("Shutdown".into()));
    assert!(!page[0].good);
    assert_eq!(page[1].value, SampleValue::Number(7.0));
}

/// Test busy and gateway statuses are retryable timeouts
#[tokio::test]
async fn test_unavailable_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/streams/W1/recorded"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .recorded_page(&SeriesHandle::new("W1", "T001"), ts(2020, 1, 1, 0, 0), ts(2020, 1, 2, 0, 0), 10)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
}

/// Test other server errors are not timeouts
#[tokio::test]
async fn test_server_error_is_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/streams/W1/recorded"))
        .respond_with(ResponseTemplate::new(500).set_body_string("archive offline"))
        .mount(&server)
        .await;

    let err = client(&server)
        .recorded_page(&SeriesHandle::new("W1", "T001"), ts(2020, 1, 1, 0, 0), ts(2020, 1, 2, 0, 0), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, HistorianError::Status { code: 500, ref body } if body == "archive offline"));
}

/// Test a slow server trips the client timeout
#[tokio::test]
async fn test_slow_server_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/streams/W1/recorded"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(stream(&[]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let historian = WebApiHistorian::new(&format!("{}/piwebapi", server.uri()), Duration::from_millis(50)).unwrap();
    let err = historian
        .recorded_page(&SeriesHandle::new("W1", "T001"), ts(2020, 1, 1, 0, 0), ts(2020, 1, 2, 0, 0), 10)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
}

/// Test first recorded lookup is an open-ended single-row query
#[tokio::test]
async fn test_first_recorded_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/streams/W1/recorded"))
        .and(query_param("endTime", "*"))
        .and(query_param("maxCount", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream(&[("2020-02-03T04:05:06Z", 1.0)])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/streams/W2/recorded"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream(&[])))
        .mount(&server)
        .await;

    let historian = client(&server);
    let first = historian
        .first_recorded_after(&SeriesHandle::new("W1", "T001"), ts(2020, 1, 1, 0, 0))
        .await
        .unwrap();
    assert_eq!(first.map(|t| t.to_rfc3339()), Some("2020-02-03T04:05:06+00:00".to_string()));

    let none = historian
        .first_recorded_after(&SeriesHandle::new("W2", "T002"), ts(2020, 1, 1, 0, 0))
        .await
        .unwrap();
    assert!(none.is_none());
}

/// Test credentials are sent as basic auth
#[tokio::test]
async fn test_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/points"))
        .and(header("Authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(point("P1DP", "SINUSOID", "")))
        .expect(1)
        .mount(&server)
        .await;

    let historian = client(&server).with_credentials("user", "pass");
    assert!(historian.resolve_tag("SINUSOID").await.is_ok());
}

/// Test tag listing walks every page of points
#[tokio::test]
async fn test_list_tags_paging() {
    let server = MockServer::start().await;
    mount_json(&server, "/piwebapi/dataservers", json!({"WebId": "DS1", "Name": "PISRV01"})).await;

    let first_page: Vec<Value> = (0..1000)
        .map(|i| point(&format!("P{i}"), &format!("TAG{i:04}"), ""))
        .collect();
    Mock::given(method("GET"))
        .and(path("/piwebapi/dataservers/DS1/points"))
        .and(query_param("startIndex", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Items": first_page })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/dataservers/DS1/points"))
        .and(query_param("startIndex", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Items": [point("PX", "LAST", "")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tags = client(&server).list_tags().await.unwrap();

    assert_eq!(tags.len(), 1001);
    assert_eq!(tags[0], r"\\PISRV01\TAG0000");
    assert_eq!(tags[1000], r"\\PISRV01\LAST");
}

/// Test attribute listing reports the backing point or NONE
#[tokio::test]
async fn test_list_attributes() {
    let server = MockServer::start().await;
    let link = format!("{}/piwebapi/points/P9", server.uri());
    Mock::given(method("GET"))
        .and(path("/piwebapi/assetdatabases"))
        .and(query_param("path", r"\\AFSRV\Plant"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"WebId": "DB1"})))
        .mount(&server)
        .await;
    mount_json(&server, "/piwebapi/assetdatabases/DB1/elements", named_items(&[("E1", "Unit1")])).await;
    mount_json(
        &server,
        "/piwebapi/elements/E1/attributes",
        json!({
            "Items": [
                attribute("A1", r"\\AFSRV\Plant\Unit1|Temp", "degC", Some(&link)),
                attribute("A2", r"\\AFSRV\Plant\Unit1|Note", "", None)
            ]
        }),
    )
    .await;
    mount_json(&server, "/piwebapi/points/P9", point("P9DP", "TEMP01", "degF")).await;

    let listings = client(&server).list_attributes("Plant").await.unwrap();

    assert_eq!(
        listings,
        vec![
            AttributeListing {
                path: r"\\AFSRV\Plant\Unit1|Temp".into(),
                tag: Some("TEMP01".into()),
            },
            AttributeListing {
                path: r"\\AFSRV\Plant\Unit1|Note".into(),
                tag: None,
            },
        ]
    );
    assert_eq!(listings[1].line(), r"\\AFSRV\Plant\Unit1|Note,NONE");
}

/// Test database listing
#[tokio::test]
async fn test_list_databases() {
    let server = MockServer::start().await;
    mount_json(&server, "/piwebapi/assetservers", json!({"WebId": "AS1"})).await;
    mount_json(
        &server,
        "/piwebapi/assetservers/AS1/assetdatabases",
        named_items(&[("DB1", "Plant"), ("DB2", "Utilities")]),
    )
    .await;

    let databases = client(&server).list_databases().await.unwrap();
    assert_eq!(databases, vec!["Plant", "Utilities"]);
}

/// Test a whole run over HTTP, recovering from one busy response
#[tokio::test]
async fn test_pipeline_over_http() {
    let server = MockServer::start().await;
    mount_json(&server, "/piwebapi/points", point("P1DP", "T001", "")).await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/streams/P1DP/recorded"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/piwebapi/streams/P1DP/recorded"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stream(&[
            ("2020-01-01T00:00:00Z", 1.0),
            ("2020-01-01T06:00:00Z", 2.0),
        ])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tags.csv");
    std::fs::write(&input, "T001,2020-01-01,2020-01-02\n").unwrap();

    let mut config = Config::default();
    config.historian.base_url = format!("{}/piwebapi", server.uri());
    config.historian.data_server = "PISRV01".into();
    config.retrieval.mode = RetrievalMode::RecordedTag;
    config.retrieval.page_size = 100;
    config.retrieval.retry_base_delay_ms = 0;
    config.retrieval.retry_max_delay_ms = 0;
    config.output.directory = dir.path().join("out");

    let historian = Arc::new(WebApiHistorian::from_config(&config).unwrap());
    let summary = run_pipeline(historian, &config, &input).await.unwrap();

    assert!(summary.is_success(), "failures: {:?}", summary.failures);
    assert_eq!(summary.retries, 1);
    assert_eq!(
        read_rows(&dir.path().join("out").join("T001")),
        vec![
            "2020-01-01T00:00:00.000000Z,1",
            "2020-01-01T06:00:00.000000Z,2",
        ]
    );
}
