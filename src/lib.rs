//! grantscrape - Resumable funding-opportunity scraper
//!
//! Pulls a paginated listing of funding opportunities, fetches and
//! normalizes each one, and validates the result. Runs are checkpointed
//! per item, so an interrupted or partially failed run picks up where it
//! left off.
//!
//! # Architecture
//!
//! Each source gets its own output directory holding:
//! - `checkpoint.json`: completed/failed ids and the current phase
//! - `audit_log.jsonl`: append-only record of everything the run did
//! - `html/`: cached detail payloads, never refetched
//! - `records/`: one normalized record per completed id
//! - `raw_index.json`, `normalized.json` and the validation/run reports
//!
//! # Modules
//!
//! - `adapters`: Listing sources (EU Funding & Tenders)
//! - `core`: Pipeline engine (Orchestrator, AuditLog, CheckpointStore, Validator)
//! - `domain`: Data structures (NormalizedRecord, AuditEvent, CheckpointState)
//! - `config`: Config file discovery and resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Scrape every built-in source
//! grantscrape run
//!
//! # Try ten Horizon Europe calls
//! grantscrape run --source horizon_europe --limit 10
//!
//! # Inspect a source's output directory
//! grantscrape status --source horizon_europe
//!
//! # Report new, updated and deleted calls since the last run
//! grantscrape update
//! ```
//!
//! Scheduling is left to the system. A crontab entry refreshing every
//! source every six hours:
//!
//! ```text
//! 0 */6 * * * cd /srv/grants && grantscrape update
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{EuFundingSource, EuSourceConfig, IndexPage, PageSender, Source};
pub use core::{Orchestrator, PipelineSettings};
pub use domain::{AuditEvent, CheckpointState, EventType, NormalizedRecord, Phase, RunSummary};
