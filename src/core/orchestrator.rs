//! Main orchestrator for the three-phase extraction pipeline.
//!
//! Phase 1 fetches and persists the index, Phase 2 fetches, normalizes and
//! checkpoints each item, Phase 3 validates the assembled output. Every phase
//! transition is written to the checkpoint and the audit log before the phase
//! does any work.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::fs;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{IndexPage, Source};
use crate::domain::{
    EventType, IndexRecord, IndexValidationError, NormalizedRecord, Phase, RunSummary,
};

use super::audit::AuditLog;
use super::cache::{DetailCache, RecordStore};
use super::checkpoint::CheckpointStore;
use super::fsutil::{read_json, write_json_atomic};
use super::lock::DirLock;
use super::retry::{AttemptFailure, AttemptObserver, RetryPolicy};
use super::validator::Validator;

pub const RAW_INDEX_FILE: &str = "raw_index.json";
pub const INDEX_VALIDATION_FILE: &str = "index_validation_errors.json";
pub const NORMALIZED_FILE: &str = "normalized.json";
pub const VALIDATION_REPORT_FILE: &str = "validation_report.json";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Tunables for one pipeline instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Retries for index and detail fetches
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Pause after every network detail fetch, in milliseconds
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Item-level checkpoint mutations per flush (1 = write-through)
    #[serde(default = "default_flush_every")]
    pub checkpoint_flush_every: usize,

    #[serde(default)]
    pub validator: Validator,
}

fn default_request_delay() -> u64 {
    800
}
fn default_flush_every() -> usize {
    1
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_delay_ms: default_request_delay(),
            checkpoint_flush_every: default_flush_every(),
            validator: Validator::default(),
        }
    }
}

impl PipelineSettings {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

/// Drives one source through the pipeline inside one output directory
pub struct Orchestrator {
    source: Arc<dyn Source>,
    out_dir: PathBuf,
    settings: PipelineSettings,
    audit: AuditLog,
    checkpoint: CheckpointStore,
    cache: DetailCache,
    records: RecordStore,
    _lock: DirLock,
}

impl Orchestrator {
    /// Open an output directory for a source.
    ///
    /// Fails if another orchestrator holds the directory or the existing
    /// checkpoint cannot be read.
    pub async fn open(
        source: Arc<dyn Source>,
        out_dir: impl Into<PathBuf>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

        let lock = DirLock::acquire(&out_dir)?;
        let checkpoint = CheckpointStore::load(&out_dir, settings.checkpoint_flush_every)
            .await
            .context("Failed to load checkpoint")?;
        let cache = DetailCache::open(&out_dir, source.detail_extension()).await?;
        let records = RecordStore::open(&out_dir).await?;
        let audit = AuditLog::open(&out_dir);

        Ok(Self {
            source,
            out_dir,
            settings,
            audit,
            checkpoint,
            cache,
            records,
            _lock: lock,
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Run the pipeline, optionally processing only the first `limit` ids.
    ///
    /// Per-item failures do not fail the run; they end up in `failed_ids`.
    /// Anything else is audited as `pipeline_error` and returned.
    #[instrument(skip(self), fields(source = %self.source.name()))]
    pub async fn run(&mut self, limit: Option<usize>) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "Starting pipeline");

        let result = self.execute(run_id, started_at, limit).await;

        if let Err(ref e) = result {
            error!(error = %format!("{:#}", e), "Pipeline failed");
            let details = json!({ "run_id": run_id, "error": format!("{:#}", e) });
            if let Err(audit_err) = self.audit.log_event(EventType::PipelineError, details).await {
                error!(error = %audit_err, "Failed to record pipeline error");
            }
        }

        result
    }

    async fn execute(
        &mut self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<RunSummary> {
        let clock = Instant::now();

        self.audit
            .log_event(
                EventType::PipelineStart,
                json!({ "source": self.source.name(), "run_id": run_id, "limit": limit }),
            )
            .await?;

        let entry = self.resume_point();
        if entry != Phase::FetchIndex {
            info!(phase = %entry, "Re-entering interrupted run");
        }

        if entry == Phase::FetchIndex {
            self.fetch_index_phase().await?;
        }
        if entry != Phase::Validation {
            self.fetch_and_normalize_phase(limit).await?;
        }
        self.validation_phase().await?;

        let state = self.checkpoint.state();
        let summary = RunSummary {
            run_id,
            source: self.source.name().to_string(),
            started_at,
            duration_seconds: clock.elapsed().as_secs_f64(),
            completed_ids: state.completed_ids.len(),
            failed_ids: state.failed_ids.len(),
            audit_summary: self.audit.summary(),
        };

        self.audit
            .log_event(EventType::PipelineComplete, serde_json::to_value(&summary)?)
            .await?;
        write_json_atomic(&self.path(RUN_SUMMARY_FILE), &summary).await?;
        self.checkpoint.set_phase(Phase::Complete).await?;

        info!(
            duration_seconds = summary.duration_seconds,
            completed = summary.completed_ids,
            failed = summary.failed_ids,
            "Pipeline completed"
        );

        Ok(summary)
    }

    /// Phase to start from, given what the previous run left behind
    fn resume_point(&self) -> Phase {
        match self.checkpoint.phase() {
            Phase::FetchAndNormalize if self.path(RAW_INDEX_FILE).exists() => {
                Phase::FetchAndNormalize
            }
            Phase::Validation if self.path(NORMALIZED_FILE).exists() => Phase::Validation,
            _ => Phase::FetchIndex,
        }
    }

    async fn enter_phase(&mut self, phase: Phase) -> Result<()> {
        self.checkpoint.set_phase(phase).await?;
        self.audit
            .log_event(EventType::PhaseStarted, json!({ "phase": phase }))
            .await
    }

    /// Phase 1: fetch the index, validate it, persist it
    async fn fetch_index_phase(&mut self) -> Result<()> {
        self.enter_phase(Phase::FetchIndex).await?;
        info!("Phase 1: fetching index");

        let source = Arc::clone(&self.source);
        let source = source.as_ref();
        let retry = self.settings.retry;

        let (pages_tx, mut pages_rx) = mpsc::unbounded_channel();
        let mut observer = AuditAttempts {
            audit: &mut self.audit,
            item_id: None,
            pages: Some(&mut pages_rx),
        };
        let fetched = retry
            .run_observed("fetch_index", || source.fetch_index(&pages_tx), &mut observer)
            .await;
        observer.record_pages().await?;
        let records = fetched.context("Index fetch failed")?;

        let rules = source.field_rules();
        let validation_errors: Vec<IndexValidationError> = records
            .iter()
            .enumerate()
            .filter_map(|(record_index, record)| {
                let errors = self.settings.validator.validate_index_record(record, &rules);
                (!errors.is_empty()).then(|| IndexValidationError {
                    record_index,
                    errors,
                    record_sample: record_sample(record),
                })
            })
            .collect();

        if !validation_errors.is_empty() {
            warn!(
                count = validation_errors.len(),
                "Index records with validation issues"
            );
        }

        write_json_atomic(&self.path(INDEX_VALIDATION_FILE), &validation_errors).await?;
        write_json_atomic(&self.path(RAW_INDEX_FILE), &records).await?;

        self.audit
            .log_event(
                EventType::IndexFetched,
                json!({ "count": records.len(), "validation_errors": validation_errors.len() }),
            )
            .await?;
        info!(count = records.len(), "Fetched index records");

        Ok(())
    }

    /// Phase 2: per-item detail fetch, normalization and checkpointing
    async fn fetch_and_normalize_phase(&mut self, limit: Option<usize>) -> Result<()> {
        self.enter_phase(Phase::FetchAndNormalize).await?;
        info!("Phase 2: fetching details and normalizing");

        let index: Vec<IndexRecord> = read_json(&self.path(RAW_INDEX_FILE))
            .await?
            .with_context(|| format!("{} is missing", RAW_INDEX_FILE))?;

        let source = Arc::clone(&self.source);
        let source = source.as_ref();

        let mut ids = source.extract_ids(&index);
        info!(ids = ids.len(), records = index.len(), "Extracted ids");

        let mut lookup: HashMap<String, &IndexRecord> = HashMap::new();
        for record in &index {
            if let Some(id) = source.extract_id(record) {
                lookup.entry(id).or_insert(record);
            }
        }

        if let Some(limit) = limit {
            ids.truncate(limit);
            info!(limit, "Limited run");
        }

        let total = ids.len();
        let already_done = ids.iter().filter(|id| self.checkpoint.is_completed(id)).count();
        if already_done > 0 {
            info!(
                remaining = total - already_done,
                total, "Resuming from checkpoint"
            );
            self.audit
                .log_event(
                    EventType::CheckpointResume,
                    json!({ "total": total, "already_completed": already_done }),
                )
                .await?;
        }

        let no_record = Value::Object(Default::default());
        let mut fresh: HashMap<String, NormalizedRecord> = HashMap::new();

        for (position, id) in ids.iter().enumerate() {
            if self.checkpoint.is_completed(id) {
                debug!(item_id = %id, "Skipping completed item");
                continue;
            }

            info!(item_id = %id, "[{}/{}] Processing", position + 1, total);
            let record = lookup.get(id.as_str()).copied().unwrap_or(&no_record);

            match self.process_item(source, id, record).await {
                Ok(normalized) => {
                    self.checkpoint.mark_completed(id).await?;
                    self.audit
                        .log_event(EventType::ItemProcessed, json!({ "item_id": id }))
                        .await?;
                    fresh.insert(id.clone(), normalized);
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    error!(item_id = %id, error = %message, "Failed to process item");
                    self.checkpoint.mark_failed(id).await?;
                    self.audit
                        .log_event(
                            EventType::ItemFailed,
                            json!({ "item_id": id, "error": message }),
                        )
                        .await?;
                }
            }
        }

        let normalized = self.assemble_output(source, &ids, &lookup, fresh).await?;
        write_json_atomic(&self.path(NORMALIZED_FILE), &normalized).await?;
        self.checkpoint.flush().await?;

        let failed = self.checkpoint.state().failed_ids.len();
        self.audit
            .log_event(
                EventType::NormalizedWritten,
                json!({ "count": normalized.len(), "failed": failed }),
            )
            .await?;
        info!(normalized = normalized.len(), failed, "Normalized records written");

        Ok(())
    }

    /// Detail retrieval (cache first), normalization and per-item validation
    async fn process_item(
        &mut self,
        source: &dyn Source,
        id: &str,
        record: &IndexRecord,
    ) -> Result<NormalizedRecord> {
        let detail = if self.cache.has(id) {
            let payload = self.cache.read(id).await?;
            self.audit
                .log_event(EventType::DetailCached, json!({ "item_id": id }))
                .await?;
            payload
        } else {
            let retry = self.settings.retry;
            let mut observer = AuditAttempts {
                audit: &mut self.audit,
                item_id: Some(id),
                pages: None,
            };
            let payload = retry
                .run_observed("fetch_detail", || source.fetch_detail(id), &mut observer)
                .await
                .with_context(|| format!("Detail fetch failed for {}", id))?;

            let issues = self.settings.validator.validate_detail(&payload);
            if !issues.is_empty() {
                warn!(item_id = %id, ?issues, "Detail validation issues");
                self.audit
                    .log_event(
                        EventType::ValidationWarning,
                        json!({ "item_id": id, "stage": "detail", "errors": issues }),
                    )
                    .await?;
            }

            self.cache.write(id, &payload).await?;
            self.audit
                .log_event(
                    EventType::DetailFetched,
                    json!({ "item_id": id, "size_bytes": payload.len() }),
                )
                .await?;
            tokio::time::sleep(self.settings.request_delay()).await;
            payload
        };

        let normalized = source
            .normalize(id, record, Some(&detail))
            .with_context(|| format!("Normalization failed for {}", id))?;

        let issues = self.settings.validator.validate_normalized(&normalized);
        if !issues.is_empty() {
            warn!(item_id = %id, ?issues, "Normalized record validation issues");
            self.audit
                .log_event(
                    EventType::ValidationWarning,
                    json!({ "item_id": id, "stage": "normalized", "errors": issues }),
                )
                .await?;
        }

        self.records.store(id, &normalized).await?;
        Ok(normalized)
    }

    /// Records for every completed id in list order, each id once.
    ///
    /// Ids completed by an earlier run are normalized again from the current
    /// index record and their cached detail, so index changes reach the
    /// output without another detail fetch.
    async fn assemble_output(
        &self,
        source: &dyn Source,
        ids: &[String],
        lookup: &HashMap<String, &IndexRecord>,
        mut fresh: HashMap<String, NormalizedRecord>,
    ) -> Result<Vec<NormalizedRecord>> {
        let mut seen = HashSet::new();
        let mut output = Vec::new();

        for id in ids {
            if !self.checkpoint.is_completed(id) || !seen.insert(id.as_str()) {
                continue;
            }
            let record = match fresh.remove(id) {
                Some(record) => Some(record),
                None => {
                    self.renormalize(source, id, lookup.get(id.as_str()).copied())
                        .await?
                }
            };
            match record {
                Some(record) => output.push(record),
                None => warn!(item_id = %id, "Completed item has no stored record"),
            }
        }

        Ok(output)
    }

    /// Rebuild a completed item's record offline, falling back to the stored one
    async fn renormalize(
        &self,
        source: &dyn Source,
        id: &str,
        record: Option<&IndexRecord>,
    ) -> Result<Option<NormalizedRecord>> {
        let Some(record) = record else {
            return self.records.load(id).await;
        };

        let detail = if self.cache.has(id) {
            Some(self.cache.read(id).await?)
        } else {
            None
        };

        match source.normalize(id, record, detail.as_deref()) {
            Ok(normalized) => {
                self.records.store(id, &normalized).await?;
                Ok(Some(normalized))
            }
            Err(e) => {
                warn!(
                    item_id = %id,
                    error = %format!("{:#}", e),
                    "Re-normalization failed, keeping stored record"
                );
                self.records.load(id).await
            }
        }
    }

    /// Phase 3: collection-level validation over normalized.json
    async fn validation_phase(&mut self) -> Result<()> {
        self.enter_phase(Phase::Validation).await?;
        info!("Phase 3: running final validation");

        let normalized: Vec<NormalizedRecord> = read_json(&self.path(NORMALIZED_FILE))
            .await?
            .with_context(|| format!("{} is missing", NORMALIZED_FILE))?;

        let report = self.settings.validator.validate_collection(&normalized);
        write_json_atomic(&self.path(VALIDATION_REPORT_FILE), &report).await?;

        info!(issues = report.issues_found.total(), "Validation complete");
        self.audit
            .log_event(EventType::ValidationComplete, serde_json::to_value(&report)?)
            .await
    }

    fn path(&self, file: &str) -> PathBuf {
        self.out_dir.join(file)
    }
}

/// Audits failed fetch attempts, and the index pages reported before them
struct AuditAttempts<'a> {
    audit: &'a mut AuditLog,
    item_id: Option<&'a str>,
    pages: Option<&'a mut UnboundedReceiver<IndexPage>>,
}

impl<'a> AuditAttempts<'a> {
    /// Audit every index page reported so far
    async fn record_pages(&mut self) -> Result<()> {
        let Some(pages) = self.pages.as_deref_mut() else {
            return Ok(());
        };

        while let Ok(page) = pages.try_recv() {
            debug!(page = page.page, records = page.records, "Index page fetched");
            self.audit
                .log_event(EventType::IndexPageFetched, serde_json::to_value(page)?)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> AttemptObserver for AuditAttempts<'a> {
    async fn attempt_failed(&mut self, failure: &AttemptFailure<'_>) -> Result<()> {
        self.record_pages().await?;
        self.audit
            .log_event(
                EventType::FetchAttemptFailed,
                json!({
                    "what": failure.what,
                    "item_id": self.item_id,
                    "attempt": failure.attempt,
                    "error": failure.error,
                    "retry_in_ms": failure.retry_in.map(|d| d.as_millis() as u64),
                }),
            )
            .await
    }
}

/// First 200 characters of a record's JSON
fn record_sample(record: &IndexRecord) -> String {
    record.to_string().chars().take(200).collect()
}
