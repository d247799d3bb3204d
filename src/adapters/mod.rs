//! Source capability sets.
//!
//! A source knows how to list opportunities, derive stable ids, fetch one
//! detail payload and normalize it. The orchestrator holds a source as a
//! dependency and owns everything else (checkpointing, caching, retries,
//! auditing).

pub mod eu_funding;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::FieldRules;
use crate::domain::{IndexRecord, NormalizedRecord};

// Re-export the EU Funding & Tenders source
pub use eu_funding::{EuFundingSource, EuSourceConfig};

/// One index page retrieved by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexPage {
    /// 1-indexed page number
    pub page: u32,
    /// Records on the page
    pub records: usize,
}

/// Where a source reports each index page it retrieves
pub type PageSender = UnboundedSender<IndexPage>;

/// Trait for listing sources
#[async_trait]
pub trait Source: Send + Sync {
    /// Namespace for ids, logs and the output directory
    fn name(&self) -> &str;

    /// Ordered fallback fields the index validator checks for id and title
    fn field_rules(&self) -> FieldRules;

    /// File extension for cached detail payloads
    fn detail_extension(&self) -> &str {
        "html"
    }

    /// Fetch every index record, following pagination.
    ///
    /// Each page retrieved is reported on `pages`; a closed receiver is not
    /// an error. Errors on unrecoverable transport failure.
    async fn fetch_index(&self, pages: &PageSender) -> Result<Vec<IndexRecord>>;

    /// Stable id for one index record; `None` when the record has none.
    ///
    /// This is the only id derivation rule: both [`Source::extract_ids`] and
    /// the orchestrator's id-to-record lookup go through it.
    fn extract_id(&self, record: &IndexRecord) -> Option<String>;

    /// Ids in index order, skipping records without one
    fn extract_ids(&self, records: &[IndexRecord]) -> Vec<String> {
        records.iter().filter_map(|r| self.extract_id(r)).collect()
    }

    /// Fetch the detail payload for one id. Errors on transport failure.
    async fn fetch_detail(&self, id: &str) -> Result<Vec<u8>>;

    /// Build the output record.
    ///
    /// Data-quality problems must not be errors: return a best-effort record
    /// and let the validator flag it. An error here marks the item failed.
    fn normalize(
        &self,
        id: &str,
        record: &IndexRecord,
        detail: Option<&[u8]>,
    ) -> Result<NormalizedRecord>;
}
