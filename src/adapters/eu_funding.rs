//! EU Funding & Tenders portal source.
//!
//! The index comes from the EC search API (POST with multipart JSON blobs,
//! paginated). Detail payloads are the public topic pages.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::core::FieldRules;
use crate::domain::{first_scalar, FieldPath, IndexRecord, NormalizedRecord};

use super::{IndexPage, PageSender, Source};

pub const SEARCH_API_URL: &str = "https://api.tech.ec.europa.eu/search-api/prod/rest/search";
pub const TOPIC_URL_PREFIX: &str =
    "https://ec.europa.eu/info/funding-tenders/opportunities/portal/screen/opportunities/topic-details/";

const USER_AGENT: &str = "Mozilla/5.0 (compatible; grantscrape/0.1)";

pub const HORIZON_EUROPE_PROGRAMME: &str = "43108390";
pub const DIGITAL_EUROPE_PROGRAMME: &str = "43152860";

pub const STATUS_FORTHCOMING: &str = "31094501";
pub const STATUS_OPEN: &str = "31094502";
pub const STATUS_CLOSED: &str = "31094503";

/// Date formats tried for values without a time component
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];

/// Query and transport settings for one EU listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EuSourceConfig {
    pub name: String,
    pub framework_programme: String,

    #[serde(default = "default_statuses")]
    pub statuses: Vec<String>,

    #[serde(default = "default_programme_period")]
    pub programme_period: String,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Hard stop for pagination
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_search_url")]
    pub search_url: String,

    #[serde(default = "default_topic_url_prefix")]
    pub topic_url_prefix: String,
}

fn default_statuses() -> Vec<String> {
    vec![
        STATUS_FORTHCOMING.to_string(),
        STATUS_OPEN.to_string(),
        STATUS_CLOSED.to_string(),
    ]
}
fn default_programme_period() -> String {
    "2021 - 2027".to_string()
}
fn default_page_size() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    500
}
fn default_request_timeout() -> u64 {
    40
}
fn default_search_url() -> String {
    SEARCH_API_URL.to_string()
}
fn default_topic_url_prefix() -> String {
    TOPIC_URL_PREFIX.to_string()
}

impl EuSourceConfig {
    pub fn new(name: impl Into<String>, framework_programme: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            framework_programme: framework_programme.into(),
            statuses: default_statuses(),
            programme_period: default_programme_period(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            request_timeout_secs: default_request_timeout(),
            search_url: default_search_url(),
            topic_url_prefix: default_topic_url_prefix(),
        }
    }

    /// Horizon Europe, all statuses
    pub fn horizon_europe() -> Self {
        Self::new("horizon_europe", HORIZON_EUROPE_PROGRAMME)
    }

    /// Digital Europe Programme, all statuses
    pub fn digital_europe() -> Self {
        Self::new("digital_europe", DIGITAL_EUROPE_PROGRAMME)
    }

    /// Built-in listing by name
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "horizon_europe" => Some(Self::horizon_europe()),
            "digital_europe" => Some(Self::digital_europe()),
            _ => None,
        }
    }

    /// Restrict the listing to open calls
    pub fn open_only(mut self) -> Self {
        self.statuses = vec![STATUS_OPEN.to_string()];
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Elasticsearch-style filter: `terms` for lists, `term` for scalars
    pub fn build_query(&self) -> Value {
        json!({
            "bool": {
                "must": [
                    { "term": { "programmePeriod": self.programme_period } },
                    { "terms": { "frameworkProgramme": [self.framework_programme] } },
                    { "terms": { "status": self.statuses } },
                ]
            }
        })
    }

    pub fn topic_url(&self, id: &str) -> String {
        format!("{}{}", self.topic_url_prefix, id)
    }
}

/// One page of search results
#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default, rename = "totalResults")]
    total_results: u64,
}

/// EU Funding & Tenders client
pub struct EuFundingSource {
    config: EuSourceConfig,
    client: reqwest::Client,
}

impl EuFundingSource {
    pub fn new(config: EuSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &EuSourceConfig {
        &self.config
    }

    fn search_form(&self) -> Result<Form> {
        let blob = |value: Value| -> Result<Part> {
            Ok(Part::text(value.to_string())
                .file_name("blob")
                .mime_str("application/json")?)
        };

        Ok(Form::new()
            .part("query", blob(self.config.build_query())?)
            .part("languages", blob(json!(["en"]))?)
            .part("sort", blob(json!({ "field": "sortStatus", "order": "ASC" }))?))
    }

    async fn fetch_page(&self, page: u32) -> Result<SearchPage> {
        let params = [
            ("apiKey", "SEDIA".to_string()),
            ("text", "***".to_string()),
            ("pageSize", self.config.page_size.to_string()),
            ("pageNumber", page.to_string()),
        ];

        let response = self
            .client
            .post(&self.config.search_url)
            .query(&params)
            .multipart(self.search_form()?)
            .send()
            .await
            .with_context(|| format!("Search request failed on page {}", page))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Search API error ({}) on page {}: {}", status, page, text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse search response on page {}", page))
    }
}

#[async_trait]
impl Source for EuFundingSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn field_rules(&self) -> FieldRules {
        FieldRules::new(
            [
                "metadata.callccm2Id",
                "reference",
                "metadata.identifier",
                "callId",
                "id",
                "identifier",
                "code",
            ],
            [
                "content",
                "metadata.callTitle",
                "metadata.title",
                "title",
                "titleEn",
            ],
        )
    }

    async fn fetch_index(&self, pages: &PageSender) -> Result<Vec<IndexRecord>> {
        let mut records = Vec::new();

        for page in 1..=self.config.max_pages {
            info!(page, "Fetching index page");
            let SearchPage {
                results,
                total_results,
            } = self.fetch_page(page).await?;

            let _ = pages.send(IndexPage {
                page,
                records: results.len(),
            });

            if results.is_empty() {
                info!(page, "No more results");
                return Ok(records);
            }

            records.extend(results);
            debug!(page, fetched = records.len(), total_results, "Index page fetched");
        }

        warn!(max_pages = self.config.max_pages, "Hit page limit, stopping");
        Ok(records)
    }

    fn extract_id(&self, record: &IndexRecord) -> Option<String> {
        ["reference", "metadata.callccm2Id", "metadata.identifier"]
            .into_iter()
            .find_map(|path| FieldPath::new(path).lookup(record).and_then(first_scalar))
    }

    async fn fetch_detail(&self, id: &str) -> Result<Vec<u8>> {
        let url = self.config.topic_url(id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Detail page returned an error: {}", url))?;

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read detail body: {}", url))?;

        Ok(bytes.to_vec())
    }

    fn normalize(
        &self,
        id: &str,
        record: &IndexRecord,
        _detail: Option<&[u8]>,
    ) -> Result<NormalizedRecord> {
        let metadata = record.get("metadata");
        let meta = |key: &str| metadata.and_then(|m| m.get(key)).and_then(first_scalar);

        let title = record
            .get("content")
            .and_then(first_scalar)
            .or_else(|| meta("callTitle"))
            .or_else(|| meta("title"))
            .or_else(|| meta("titleEn"))
            .unwrap_or_default();

        let programme = meta("programme")
            .or_else(|| meta("programmeName"))
            .or_else(|| meta("fundingProgramme"));

        let mut close_date = meta("deadlineDate").and_then(|d| parse_date(&d));
        let mut open_date = meta("openingDate")
            .or_else(|| meta("startDate"))
            .and_then(|d| parse_date(&d));

        if close_date.is_none() || open_date.is_none() {
            if let Some(first) = metadata
                .and_then(|m| m.get("deadlines"))
                .and_then(Value::as_array)
                .and_then(|d| d.first())
                .filter(|d| d.is_object())
            {
                let field = |key: &str| first.get(key).and_then(first_scalar);
                if open_date.is_none() {
                    open_date = field("startDate").and_then(|d| parse_date(&d));
                }
                if close_date.is_none() {
                    close_date = field("date").and_then(|d| parse_date(&d));
                }
            }
        }

        Ok(NormalizedRecord::new(
            format!("{}:{}", self.name(), id),
            self.name(),
            clean_title(&title),
            self.config.topic_url(id),
            record.clone(),
        )
        .with_status(meta("status"))
        .with_programme(programme)
        .with_call_id(id)
        .with_dates(open_date, close_date))
    }
}

/// Collapse whitespace, drop zero-width spaces and strip edge dashes
pub fn clean_title(title: &str) -> String {
    let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .replace('\u{200b}', "")
        .trim_matches(|c: char| matches!(c, '-' | ' ' | '\t'))
        .to_string()
}

/// Normalize a date string to ISO-8601.
///
/// Values carrying a time are re-rendered as ISO date-times; plain dates in
/// common EU layouts become `YYYY-MM-DD`. Anything else is kept as-is.
pub fn parse_date(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.contains('T') {
        if let Some(iso) = parse_datetime(value) {
            return Some(iso);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }

    warn!(value, "Could not parse date");
    Some(value.to_string())
}

fn parse_datetime(value: &str) -> Option<String> {
    let value = value.replace('Z', "+00:00");

    let with_offset = DateTime::parse_from_rfc3339(&value)
        .or_else(|_| DateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .or_else(|_| DateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M%z"));
    if let Ok(dt) = with_offset {
        return Some(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false));
    }

    NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M"))
        .ok()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}
