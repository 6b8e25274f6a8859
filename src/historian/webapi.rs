//! PI Web API client
//!
//! Implements [`Historian`] against a PI Web API style REST endpoint:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | tag lookup | `GET points?path=\\server\tag` |
//! | attribute lookup | `GET attributes?path=\\afserver\database\element\|attribute` |
//! | recorded page | `GET streams/{webId}/recorded?startTime&endTime&boundaryType=Inside&maxCount` |
//! | interpolated page | `GET streams/{webId}/interpolated?startTime&endTime&interval` |
//!
//! Timeouts and the gateway/busy statuses (408, 503, 504) are reported as
//! [`HistorianError::Timeout`] so callers can retry them.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{Historian, HistorianError, SeriesHandle};
use crate::config::Config;
use crate::models::{Page, Sample, SampleValue, UnitConversion};
use crate::storage::format_timestamp;

/// Page size of catalog listings
const LIST_PAGE_SIZE: usize = 1000;

/// Concurrent point lookups while listing attributes
const LIST_CONCURRENCY: usize = 8;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WebIdDto {
    web_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PointDto {
    web_id: String,
    name: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    engineering_units: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LinksDto {
    #[serde(default)]
    point: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttributeDto {
    web_id: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    default_units_name: String,
    #[serde(default)]
    links: LinksDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NamedDto {
    web_id: String,
    name: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamValueDto {
    timestamp: DateTime<Utc>,
    value: serde_json::Value,
    #[serde(default)]
    units_abbreviation: String,
    #[serde(default = "default_good")]
    good: bool,
}

fn default_good() -> bool {
    true
}

impl From<StreamValueDto> for Sample {
    fn from(dto: StreamValueDto) -> Self {
        Self {
            timestamp: dto.timestamp,
            value: decode_value(dto.value),
            good: dto.good,
            unit: dto.units_abbreviation,
        }
    }
}

/// Numbers stay numeric; digital states `{Name, Value}` and strings become
/// state text
fn decode_value(value: serde_json::Value) -> SampleValue {
    use serde_json::Value;

    match value {
        Value::Number(n) => n
            .as_f64()
            .map(SampleValue::Number)
            .unwrap_or_else(|| SampleValue::State(n.to_string())),
        Value::String(s) => SampleValue::State(s),
        Value::Bool(b) => SampleValue::Number(if b { 1.0 } else { 0.0 }),
        Value::Object(map) => {
            let name = map.get("Name").and_then(Value::as_str).map(str::to_string);
            SampleValue::State(name.unwrap_or_else(|| Value::Object(map).to_string()))
        }
        Value::Null => SampleValue::State(String::from("No Data")),
        other => SampleValue::State(other.to_string()),
    }
}

// ============================================================================
// Catalog listing
// ============================================================================

/// One attribute of an asset database and the PI point behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeListing {
    pub path: String,
    pub tag: Option<String>,
}

impl AttributeListing {
    /// `attributePath,tagName`, with `NONE` when no point is attached
    pub fn line(&self) -> String {
        format!("{},{}", self.path, self.tag.as_deref().unwrap_or("NONE"))
    }
}

// ============================================================================
// Client
// ============================================================================

/// PI Web API historian
pub struct WebApiHistorian {
    /// HTTP client with configured timeout
    client: Client,

    /// API root, always ending with `/`
    base_url: Url,

    data_server: String,
    asset_server: String,
    database: String,
    credentials: Option<(String, String)>,

    /// Conversions from a point's engineering unit to an attribute's default
    units: Vec<UnitConversion>,
}

impl WebApiHistorian {
    /// Create a client for the API rooted at `base_url`
    ///
    /// # Errors
    ///
    /// Fails if `base_url` is not a valid URL or the HTTP client cannot be
    /// created
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            data_server: String::new(),
            asset_server: String::new(),
            database: String::new(),
            credentials: None,
            units: Vec::new(),
        })
    }

    /// Create a client from the `[historian]` and `[[units]]` settings
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let historian = &config.historian;
        let mut client = Self::new(&historian.base_url, config.request_timeout())?
            .with_data_server(&historian.data_server)
            .with_asset_database(&historian.asset_server, &historian.database)
            .with_units(config.units.clone());
        if let Some(username) = &historian.username {
            client = client.with_credentials(
                username,
                historian.password.as_deref().unwrap_or_default(),
            );
        }
        Ok(client)
    }

    /// Data archive server used to resolve tags
    pub fn with_data_server(mut self, server: &str) -> Self {
        self.data_server = server.to_string();
        self
    }

    /// Asset server and database used to resolve attributes
    pub fn with_asset_database(mut self, server: &str, database: &str) -> Self {
        self.asset_server = server.to_string();
        self.database = database.to_string();
        self
    }

    /// Use HTTP basic authentication
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    pub fn with_units(mut self, units: Vec<UnitConversion>) -> Self {
        self.units = units;
        self
    }

    /// Path of every point on the data server, e.g. `\\PISRV01\SINUSOID`
    pub async fn list_tags(&self) -> Result<Vec<String>, HistorianError> {
        let server: WebIdDto = self
            .get_json(
                self.endpoint("dataservers")?,
                &[("path", format!(r"\\{}", self.data_server))],
            )
            .await?;

        let points_url = self.endpoint(&format!("dataservers/{}/points", server.web_id))?;
        let mut tags = Vec::new();
        let mut start_index = 0;
        loop {
            let page: Items<PointDto> = self
                .get_json(
                    points_url.clone(),
                    &[
                        ("startIndex", start_index.to_string()),
                        ("maxCount", LIST_PAGE_SIZE.to_string()),
                    ],
                )
                .await?;
            let count = page.items.len();
            tags.extend(page.items.into_iter().map(|p| {
                if p.path.is_empty() {
                    format!(r"\\{}\{}", self.data_server, p.name)
                } else {
                    p.path
                }
            }));
            tracing::debug!(start_index, count, "Listed tag page");

            if count < LIST_PAGE_SIZE {
                return Ok(tags);
            }
            start_index += count;
        }
    }

    /// Names of the databases on the asset server
    pub async fn list_databases(&self) -> Result<Vec<String>, HistorianError> {
        let server: WebIdDto = self
            .get_json(
                self.endpoint("assetservers")?,
                &[("path", format!(r"\\{}", self.asset_server))],
            )
            .await?;

        let databases: Items<NamedDto> = self
            .get_json(
                self.endpoint(&format!("assetservers/{}/assetdatabases", server.web_id))?,
                &[],
            )
            .await?;
        Ok(databases.items.into_iter().map(|d| d.name).collect())
    }

    /// Every attribute of every element in `database`
    pub async fn list_attributes(
        &self,
        database: &str,
    ) -> Result<Vec<AttributeListing>, HistorianError> {
        let db: WebIdDto = self
            .get_json(
                self.endpoint("assetdatabases")?,
                &[("path", format!(r"\\{}\{}", self.asset_server, database))],
            )
            .await?;

        let elements_url = self.endpoint(&format!("assetdatabases/{}/elements", db.web_id))?;
        let mut elements = Vec::new();
        let mut start_index = 0;
        loop {
            let page: Items<NamedDto> = self
                .get_json(
                    elements_url.clone(),
                    &[
                        ("searchFullHierarchy", "true".to_string()),
                        ("startIndex", start_index.to_string()),
                        ("maxCount", LIST_PAGE_SIZE.to_string()),
                    ],
                )
                .await?;
            let count = page.items.len();
            elements.extend(page.items);
            if count < LIST_PAGE_SIZE {
                break;
            }
            start_index += count;
        }
        tracing::info!(database, elements = elements.len(), "Listing attributes");

        let mut listings = Vec::new();
        for element in &elements {
            let attributes: Items<AttributeDto> = self
                .get_json(
                    self.endpoint(&format!("elements/{}/attributes", element.web_id))?,
                    &[],
                )
                .await?;

            let resolved: Vec<AttributeListing> = stream::iter(attributes.items)
                .map(|attribute| async move {
                    let tag = match &attribute.links.point {
                        Some(link) => Some(self.point_at(link).await?.name),
                        None => None,
                    };
                    Ok::<_, HistorianError>(AttributeListing {
                        path: attribute.path,
                        tag,
                    })
                })
                .buffered(LIST_CONCURRENCY)
                .try_collect()
                .await?;
            tracing::debug!(element = %element.path, attributes = resolved.len(), "Listed element");
            listings.extend(resolved);
        }
        Ok(listings)
    }

    fn endpoint(&self, path: &str) -> Result<Url, HistorianError> {
        self.base_url
            .join(path)
            .map_err(|e| HistorianError::Decode(format!("invalid endpoint '{path}': {e}")))
    }

    fn request(&self, url: Url) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    /// Send a GET request and decode its JSON body
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, HistorianError> {
        let target = url.path().to_string();
        let response = self
            .request(url)
            .query(query)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &target, body));
        }

        serde_json::from_str(&body)
            .map_err(|e| HistorianError::Decode(format!("{target}: {e}")))
    }

    async fn point_at(&self, link: &str) -> Result<PointDto, HistorianError> {
        let url = Url::parse(link)
            .map_err(|e| HistorianError::Decode(format!("invalid point link '{link}': {e}")))?;
        self.get_json(url, &[]).await
    }

    fn attribute_path(&self, path: &str) -> String {
        if path.starts_with(r"\\") {
            path.to_string()
        } else {
            format!(r"\\{}\{}\{}", self.asset_server, self.database, path)
        }
    }

    /// Configured conversion from `source` into `target`
    fn conversion(&self, path: &str, source: &str, target: &str) -> Option<UnitConversion> {
        if source.is_empty() || target.is_empty() || source == target {
            return None;
        }
        let found = self
            .units
            .iter()
            .find(|u| u.from == source && u.to == target)
            .cloned();
        if found.is_none() {
            tracing::warn!(
                attribute = path,
                source,
                target,
                "No unit conversion configured, values are written unconverted"
            );
        }
        found
    }

    async fn stream_page(
        &self,
        series: &SeriesHandle,
        kind: &str,
        query: &[(&str, String)],
    ) -> Result<Page, HistorianError> {
        let url = self.endpoint(&format!("streams/{}/{kind}", series.id))?;
        let page: Items<StreamValueDto> = self.get_json(url, query).await.map_err(|e| match e {
            HistorianError::NotFound(_) => HistorianError::NotFound(series.name.clone()),
            other => other,
        })?;
        Ok(page.items.into_iter().map(Sample::from).collect())
    }
}

fn classify_transport(e: reqwest::Error) -> HistorianError {
    if e.is_timeout() {
        HistorianError::Timeout(e.to_string())
    } else {
        HistorianError::Http(e)
    }
}

fn classify_status(status: StatusCode, target: &str, body: String) -> HistorianError {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            HistorianError::Timeout(format!("{target} returned {status}"))
        }
        StatusCode::NOT_FOUND => HistorianError::NotFound(target.to_string()),
        _ => HistorianError::Status {
            code: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl Historian for WebApiHistorian {
    async fn resolve_tag(&self, name: &str) -> Result<SeriesHandle, HistorianError> {
        let path = format!(r"\\{}\{}", self.data_server, name);
        let point: PointDto = self
            .get_json(self.endpoint("points")?, &[("path", path)])
            .await
            .map_err(|e| match e {
                HistorianError::NotFound(_) => HistorianError::NotFound(name.to_string()),
                other => other,
            })?;

        tracing::debug!(tag = name, web_id = %point.web_id, "Resolved tag");
        Ok(SeriesHandle::new(point.web_id, name))
    }

    async fn resolve_attribute(&self, path: &str) -> Result<SeriesHandle, HistorianError> {
        let full_path = self.attribute_path(path);
        let attribute: AttributeDto = self
            .get_json(self.endpoint("attributes")?, &[("path", full_path)])
            .await
            .map_err(|e| match e {
                HistorianError::NotFound(_) => HistorianError::NotFound(path.to_string()),
                other => other,
            })?;

        let link = attribute
            .links
            .point
            .as_deref()
            .ok_or_else(|| HistorianError::NotFound(format!("{path} has no PI point")))?;
        let point = self.point_at(link).await?;

        tracing::debug!(
            attribute = path,
            tag = %point.name,
            units = %point.engineering_units,
            default_units = %attribute.default_units_name,
            "Resolved attribute"
        );
        Ok(SeriesHandle {
            conversion: self.conversion(
                path,
                &point.engineering_units,
                &attribute.default_units_name,
            ),
            id: point.web_id,
            name: path.to_string(),
        })
    }

    async fn recorded_page(
        &self,
        series: &SeriesHandle,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_count: usize,
    ) -> Result<Page, HistorianError> {
        self.stream_page(
            series,
            "recorded",
            &[
                ("startTime", format_timestamp(start)),
                ("endTime", format_timestamp(end)),
                ("boundaryType", "Inside".to_string()),
                ("maxCount", max_count.to_string()),
            ],
        )
        .await
    }

    async fn interpolated_page(
        &self,
        series: &SeriesHandle,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Page, HistorianError> {
        self.stream_page(
            series,
            "interpolated",
            &[
                ("startTime", format_timestamp(start)),
                ("endTime", format_timestamp(end)),
                ("interval", format!("{}s", interval.as_secs())),
            ],
        )
        .await
    }

    async fn first_recorded_after(
        &self,
        series: &SeriesHandle,
        start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, HistorianError> {
        let page = self
            .stream_page(
                series,
                "recorded",
                &[
                    ("startTime", format_timestamp(start)),
                    ("endTime", "*".to_string()),
                    ("boundaryType", "Inside".to_string()),
                    ("maxCount", "1".to_string()),
                ],
            )
            .await?;
        Ok(page.first().map(|s| s.timestamp))
    }
}
