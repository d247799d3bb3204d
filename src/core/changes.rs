//! Change detection between two normalized snapshots.
//!
//! `update` reads `normalized.json` before and after a run and reports new,
//! updated and deleted opportunities keyed by record id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::NormalizedRecord;

use super::fsutil::{read_json, write_json_atomic};

/// Snapshot of normalized records keyed by id
pub type Snapshot = BTreeMap<String, NormalizedRecord>;

/// Load `normalized.json` as a snapshot; a missing file is an empty snapshot
pub async fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let records: Vec<NormalizedRecord> = read_json(path).await?.unwrap_or_default();
    Ok(records.into_iter().map(|r| (r.id.clone(), r)).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGrant {
    pub id: String,
    pub title: String,
    pub status: Option<String>,
    pub open_date: Option<String>,
    pub close_date: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatedGrant {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Changed fields only
    pub changes: BTreeMap<String, FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedGrant {
    pub id: String,
    pub title: String,
    pub was_status: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub new: usize,
    pub updated: usize,
    pub deleted: usize,
}

/// Persisted as `update_report_<YYYYmmdd_HHMMSS>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub previous_count: usize,
    pub current_count: usize,
    pub changes: ChangeCounts,
    pub new_grants: Vec<NewGrant>,
    pub updated_grants: Vec<UpdatedGrant>,
    pub deleted_grants: Vec<DeletedGrant>,
}

impl UpdateReport {
    /// Compare two snapshots. Lists are ordered by id.
    pub fn between(source: &str, previous: &Snapshot, current: &Snapshot) -> Self {
        let new_grants: Vec<NewGrant> = current
            .values()
            .filter(|r| !previous.contains_key(&r.id))
            .map(|r| NewGrant {
                id: r.id.clone(),
                title: r.title.clone(),
                status: r.status.clone(),
                open_date: r.open_date.clone(),
                close_date: r.close_date.clone(),
                url: r.url.clone(),
            })
            .collect();

        let deleted_grants: Vec<DeletedGrant> = previous
            .values()
            .filter(|r| !current.contains_key(&r.id))
            .map(|r| DeletedGrant {
                id: r.id.clone(),
                title: r.title.clone(),
                was_status: r.status.clone(),
            })
            .collect();

        let updated_grants: Vec<UpdatedGrant> = current
            .values()
            .filter_map(|new| {
                let old = previous.get(&new.id)?;
                let changes = field_changes(old, new);
                (!changes.is_empty()).then(|| UpdatedGrant {
                    id: new.id.clone(),
                    title: new.title.clone(),
                    url: new.url.clone(),
                    changes,
                })
            })
            .collect();

        Self {
            timestamp: Utc::now(),
            source: source.to_string(),
            previous_count: previous.len(),
            current_count: current.len(),
            changes: ChangeCounts {
                new: new_grants.len(),
                updated: updated_grants.len(),
                deleted: deleted_grants.len(),
            },
            new_grants,
            updated_grants,
            deleted_grants,
        }
    }

    pub fn file_name(&self) -> String {
        format!("update_report_{}.json", self.timestamp.format("%Y%m%d_%H%M%S"))
    }

    /// Write the report into `out_dir`, returning its path
    pub async fn write(&self, out_dir: &Path) -> Result<PathBuf> {
        let path = out_dir.join(self.file_name());
        write_json_atomic(&path, self).await?;
        Ok(path)
    }
}

fn field_changes(old: &NormalizedRecord, new: &NormalizedRecord) -> BTreeMap<String, FieldChange> {
    let fields = [
        ("status", &old.status, &new.status),
        ("close_date", &old.close_date, &new.close_date),
        ("open_date", &old.open_date, &new.open_date),
    ];

    let mut changes: BTreeMap<String, FieldChange> = fields
        .into_iter()
        .filter(|(_, old, new)| old != new)
        .map(|(name, old, new)| {
            (
                name.to_string(),
                FieldChange {
                    old: old.clone(),
                    new: new.clone(),
                },
            )
        })
        .collect();

    if old.title != new.title {
        changes.insert(
            "title".to_string(),
            FieldChange {
                old: Some(old.title.clone()),
                new: Some(new.title.clone()),
            },
        );
    }

    changes
}
