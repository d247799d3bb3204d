//! Domain types for the scraper.
//!
//! This module contains the core data structures:
//! - Record: index records and the normalized output schema
//! - Events: immutable audit log entries
//! - Checkpoint: durable per-item progress
//! - Report: validation and run summary artifacts

pub mod checkpoint;
pub mod events;
pub mod record;
pub mod report;

// Re-export commonly used types
pub use checkpoint::{CheckpointState, Phase};
pub use events::{AuditEvent, EventType};
pub use record::{first_scalar, has_content, FieldPath, IndexRecord, NormalizedRecord};
pub use report::{
    IndexValidationError, IssueCounts, IssueDetails, RunSummary, SuspiciousRecord,
    ValidationReport,
};
