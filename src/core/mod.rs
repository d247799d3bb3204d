//! Core pipeline engine.
//!
//! This module contains:
//! - AuditLog: Append-only JSONL event log
//! - CheckpointStore: Durable per-source progress
//! - Validator: Index, detail, normalized and collection checks
//! - RetryPolicy: Exponential backoff for network fetches
//! - DetailCache / RecordStore: Per-item on-disk stores
//! - Orchestrator: Three-phase execution engine
//! - UpdateReport: Change detection between runs

pub mod audit;
pub mod cache;
pub mod changes;
pub mod checkpoint;
pub mod fsutil;
pub mod lock;
pub mod orchestrator;
pub mod retry;
pub mod validator;

// Re-export commonly used types
pub use audit::AuditLog;
pub use cache::{DetailCache, RecordStore};
pub use changes::{load_snapshot, UpdateReport};
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use lock::{DirLock, LockError};
pub use orchestrator::{Orchestrator, PipelineSettings};
pub use retry::{AttemptFailure, AttemptObserver, RetryPolicy};
pub use validator::{FieldRules, Validator};
