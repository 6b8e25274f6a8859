//! Test fixtures for integration tests
//!
//! Web API response bodies and request files

use serde_json::{json, Value};

/// Request file mixing valid, malformed and comment lines
pub const RECORDED_REQUESTS: &str = "\
# series,start,end
T001,2020-01-01T00:00:00Z,2020-01-03T00:00:00Z
T002,2020-01-01,2020-01-02
not-a-request
T003,2020-01-05,2020-01-01
MISSING,2020-01-01,2020-01-02
";

/// `GET points?path=...` body
pub fn point(web_id: &str, name: &str, units: &str) -> Value {
    json!({
        "WebId": web_id,
        "Id": 42,
        "Name": name,
        "Path": format!(r"\\PISRV01\{name}"),
        "PointClass": "classic",
        "EngineeringUnits": units,
        "Links": {}
    })
}

/// `GET attributes?path=...` body; `point_link` is the absolute point URL
pub fn attribute(web_id: &str, path: &str, default_units: &str, point_link: Option<&str>) -> Value {
    let mut links = json!({ "Self": "https://example/attributes" });
    if let Some(link) = point_link {
        links["Point"] = json!(link);
    }
    json!({
        "WebId": web_id,
        "Name": path.rsplit('|').next().unwrap_or(path),
        "Path": path,
        "DefaultUnitsName": default_units,
        "Links": links
    })
}

/// `GET streams/{webId}/recorded` body
pub fn stream(values: &[(&str, f64)]) -> Value {
    let items: Vec<Value> = values
        .iter()
        .map(|(timestamp, value)| {
            json!({
                "Timestamp": timestamp,
                "Value": value,
                "UnitsAbbreviation": "",
                "Good": true,
                "Questionable": false,
                "Substituted": false
            })
        })
        .collect();
    json!({ "Items": items })
}

/// Generic `{Items: [...]}` body of named objects
pub fn named_items(items: &[(&str, &str)]) -> Value {
    let items: Vec<Value> = items
        .iter()
        .map(|(web_id, name)| json!({ "WebId": web_id, "Name": name, "Path": format!(r"\\AFSRV\{name}") }))
        .collect();
    json!({ "Items": items })
}
