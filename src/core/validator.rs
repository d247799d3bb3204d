//! Data-quality gates.
//!
//! Every check returns advisory issue strings; an empty list means clean.
//! Nothing here aborts the pipeline.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::{
    FieldPath, IndexRecord, IssueDetails, NormalizedRecord, SuspiciousRecord, ValidationReport,
};

/// Ordered fallback field paths a source stores its id and title under
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRules {
    pub id_fields: Vec<FieldPath>,
    pub title_fields: Vec<FieldPath>,
}

impl FieldRules {
    pub fn new<I, T>(id_fields: I, title_fields: T) -> Self
    where
        I: IntoIterator,
        I::Item: Into<FieldPath>,
        T: IntoIterator,
        T::Item: Into<FieldPath>,
    {
        Self {
            id_fields: id_fields.into_iter().map(Into::into).collect(),
            title_fields: title_fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// Thresholds for the stateless checks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    /// Detail payloads shorter than this are flagged
    #[serde(default = "default_min_detail_bytes")]
    pub min_detail_bytes: usize,

    /// Titles shorter than this (after trimming) are flagged in Phase 3
    #[serde(default = "default_min_title_chars")]
    pub min_title_chars: usize,
}

fn default_min_detail_bytes() -> usize {
    100
}
fn default_min_title_chars() -> usize {
    5
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            min_detail_bytes: default_min_detail_bytes(),
            min_title_chars: default_min_title_chars(),
        }
    }
}

impl Validator {
    /// Index record: must yield an id and a title through the source's fallbacks
    pub fn validate_index_record(&self, record: &IndexRecord, rules: &FieldRules) -> Vec<String> {
        let mut errors = Vec::new();

        if !rules.id_fields.iter().any(|f| f.is_present(record)) {
            errors.push("Missing ID field".to_string());
        }
        if !rules.title_fields.iter().any(|f| f.is_present(record)) {
            errors.push("Missing title field".to_string());
        }

        errors
    }

    /// Detail payload: size floor and error-page heuristic
    pub fn validate_detail(&self, payload: &[u8]) -> Vec<String> {
        let mut errors = Vec::new();

        if payload.len() < self.min_detail_bytes {
            errors.push(format!("Detail payload too short ({} bytes)", payload.len()));
        }

        let text = String::from_utf8_lossy(payload).to_lowercase();
        if text.contains("error") && text.contains("404") {
            errors.push("Detail payload looks like a 404 error page".to_string());
        }

        errors
    }

    /// Normalized record: title, url, and date syntax
    pub fn validate_normalized(&self, record: &NormalizedRecord) -> Vec<String> {
        let mut errors = Vec::new();

        if record.title.trim().is_empty() {
            errors.push("Empty title".to_string());
        }
        if record.url.is_empty() {
            errors.push("Missing URL".to_string());
        }

        for (field, value) in [
            ("open_date", &record.open_date),
            ("close_date", &record.close_date),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                if value.contains('T') && !is_iso_datetime(value) {
                    errors.push(format!("Invalid {} format: {}", field, value));
                }
            }
        }

        errors
    }

    /// Whole-collection checks run in Phase 3
    pub fn validate_collection(&self, records: &[NormalizedRecord]) -> ValidationReport {
        let mut details = IssueDetails::default();

        for record in records {
            let title = record.title.trim();

            if title.chars().count() < self.min_title_chars {
                details.empty_titles.push(record.id.clone());
            }

            let has_open = record.open_date.as_deref().is_some_and(|d| !d.is_empty());
            let has_close = record.close_date.as_deref().is_some_and(|d| !d.is_empty());
            if !has_open && !has_close {
                details.missing_dates.push(record.id.clone());
            }

            if has_garbled_chars(&record.title) {
                details.suspicious_data.push(SuspiciousRecord {
                    grant_id: record.id.clone(),
                    issue: "encoding_problems".to_string(),
                    title_sample: record.title.chars().take(100).collect(),
                });
            }
        }

        ValidationReport::from_details(records.len(), details)
    }
}

/// Strict ISO-8601 date-time check; a trailing `Z` is read as UTC
pub fn is_iso_datetime(value: &str) -> bool {
    let value = value.replace('Z', "+00:00");

    DateTime::parse_from_rfc3339(&value).is_ok()
        || DateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f%:z").is_ok()
        || DateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M%:z").is_ok()
        || NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M").is_ok()
}

fn has_garbled_chars(title: &str) -> bool {
    title.chars().any(|c| c == '\u{FFFD}' || c.is_control())
}
