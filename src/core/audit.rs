//! Append-only audit log with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) in
//! `<out_dir>/audit_log.jsonl` and are never rewritten. The in-memory counts
//! only cover events logged by this instance; use [`AuditLog::replay_summary`]
//! for the full history.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::{AuditEvent, EventType};

pub const AUDIT_LOG_FILE: &str = "audit_log.jsonl";

/// File-based audit log using JSONL format
pub struct AuditLog {
    /// Path to the audit_log.jsonl file
    log_path: PathBuf,

    /// Per-type counts for events appended by this instance
    counts: BTreeMap<EventType, u64>,
}

impl AuditLog {
    /// Open the audit log for an output directory. The file is created lazily.
    pub fn open(out_dir: &Path) -> Self {
        Self {
            log_path: out_dir.join(AUDIT_LOG_FILE),
            counts: BTreeMap::new(),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append an event to the log
    pub async fn log_event(&mut self, event_type: EventType, details: Value) -> Result<()> {
        let event = AuditEvent::new(event_type, details);
        self.append(&event).await?;
        *self.counts.entry(event_type).or_insert(0) += 1;
        Ok(())
    }

    async fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .with_context(|| format!("Failed to open audit log: {}", self.log_path.display()))?;

        let json = serde_json::to_string(event).context("Failed to serialize audit event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write audit event")?;
        file.flush().await.context("Failed to flush audit event")?;

        Ok(())
    }

    /// Event counts for this process only
    pub fn summary(&self) -> BTreeMap<EventType, u64> {
        self.counts.clone()
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<AuditEvent>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .await
            .with_context(|| format!("Failed to open audit log: {}", self.log_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse audit event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Event counts across the whole log, including previous runs
    pub async fn replay_summary(&self) -> Result<BTreeMap<EventType, u64>> {
        let mut counts = BTreeMap::new();
        for event in self.replay().await? {
            *counts.entry(event.event_type).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
