//! Audit events for the append-only run log.
//!
//! Every externally observable action the pipeline takes is recorded as one
//! event. The log is the ground truth for what happened; summaries are derived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single line of `audit_log.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Event-specific payload (item id, counts, error message, ...)
    pub details: Value,
}

impl AuditEvent {
    /// Create a new event with the current timestamp
    pub fn new(event_type: EventType, details: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            details,
        }
    }
}

/// Types of events the pipeline records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A run has started
    PipelineStart,

    /// A phase is about to execute
    PhaseStarted,

    /// One index page retrieved from the source
    IndexPageFetched,

    /// Phase 1 persisted the raw index
    IndexFetched,

    /// Phase 2 found previously completed ids
    CheckpointResume,

    /// A network attempt (index or detail) failed
    FetchAttemptFailed,

    /// Detail payload retrieved over the network
    DetailFetched,

    /// Detail payload served from the on-disk cache
    DetailCached,

    /// Non-fatal data-quality issue on a single item
    ValidationWarning,

    /// Item normalized and checkpointed
    ItemProcessed,

    /// Item fetch or normalization failed; the run continues
    ItemFailed,

    /// Phase 2 persisted normalized.json
    NormalizedWritten,

    /// Phase 3 persisted the validation report
    ValidationComplete,

    /// A run finished all phases
    PipelineComplete,

    /// A run aborted
    PipelineError,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStart => "pipeline_start",
            Self::PhaseStarted => "phase_started",
            Self::IndexPageFetched => "index_page_fetched",
            Self::IndexFetched => "index_fetched",
            Self::CheckpointResume => "checkpoint_resume",
            Self::FetchAttemptFailed => "fetch_attempt_failed",
            Self::DetailFetched => "detail_fetched",
            Self::DetailCached => "detail_cached",
            Self::ValidationWarning => "validation_warning",
            Self::ItemProcessed => "item_processed",
            Self::ItemFailed => "item_failed",
            Self::NormalizedWritten => "normalized_written",
            Self::ValidationComplete => "validation_complete",
            Self::PipelineComplete => "pipeline_complete",
            Self::PipelineError => "pipeline_error",
        }
    }

    /// Events that indicate something went wrong
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::FetchAttemptFailed | Self::ItemFailed | Self::PipelineError
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
