//! Report artifacts written at the end of each phase and run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::EventType;

/// One index record that failed validation (`index_validation_errors.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexValidationError {
    /// Position in the raw index
    pub record_index: usize,
    pub errors: Vec<String>,
    /// First 200 characters of the record's JSON
    pub record_sample: String,
}

/// Collection-level findings (`validation_report.json`)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total_grants: usize,
    pub issues_found: IssueCounts,
    pub details: IssueDetails,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IssueCounts {
    pub empty_titles: usize,
    pub missing_dates: usize,
    pub suspicious_data: usize,
}

impl IssueCounts {
    pub fn total(&self) -> usize {
        self.empty_titles + self.missing_dates + self.suspicious_data
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IssueDetails {
    /// Record ids with empty or near-empty titles
    pub empty_titles: Vec<String>,
    /// Record ids with neither an open nor a close date
    pub missing_dates: Vec<String>,
    pub suspicious_data: Vec<SuspiciousRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousRecord {
    pub grant_id: String,
    pub issue: String,
    pub title_sample: String,
}

impl ValidationReport {
    /// Recompute counts from the detail lists
    pub fn from_details(total_grants: usize, details: IssueDetails) -> Self {
        let issues_found = IssueCounts {
            empty_titles: details.empty_titles.len(),
            missing_dates: details.missing_dates.len(),
            suspicious_data: details.suspicious_data.len(),
        };
        Self {
            total_grants,
            issues_found,
            details,
        }
    }
}

/// Final artifact of a successful run (`run_summary.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub completed_ids: usize,
    pub failed_ids: usize,
    /// Event counts for this process only
    pub audit_summary: BTreeMap<EventType, u64>,
}
