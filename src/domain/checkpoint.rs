//! Checkpoint state: which items are done, which failed, and where the run is.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline phase recorded in `checkpoint.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Fresh output directory, nothing has run
    #[default]
    Init,

    FetchIndex,

    FetchAndNormalize,

    Validation,

    /// The last run finished every phase
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::FetchIndex => "fetch_index",
            Self::FetchAndNormalize => "fetch_and_normalize",
            Self::Validation => "validation",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable progress record for one output directory.
///
/// An id is never in both sets at once.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default)]
    pub completed_ids: BTreeSet<String>,

    #[serde(default)]
    pub failed_ids: BTreeSet<String>,

    #[serde(default)]
    pub phase: Phase,

    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CheckpointState {
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed_ids.contains(id)
    }

    pub fn is_failed(&self, id: &str) -> bool {
        self.failed_ids.contains(id)
    }

    /// Record success; a later success clears an earlier failure
    pub fn mark_completed(&mut self, id: &str) {
        self.failed_ids.remove(id);
        self.completed_ids.insert(id.to_string());
    }

    pub fn mark_failed(&mut self, id: &str) {
        self.completed_ids.remove(id);
        self.failed_ids.insert(id.to_string());
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.last_updated = Some(Utc::now());
    }
}
