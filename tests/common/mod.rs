//! Scripted in-memory source shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use grantscrape::core::{AuditLog, FieldRules, Orchestrator, PipelineSettings, RetryPolicy};
use grantscrape::domain::{
    first_scalar, AuditEvent, EventType, IndexRecord, NormalizedRecord,
};
use grantscrape::{IndexPage, PageSender, Source};

pub const SOURCE_NAME: &str = "fake";

/// Source whose index and failures are fixed up front
pub struct FakeSource {
    index: Vec<Value>,
    fail_index: bool,
    failing_details: HashSet<String>,
    failing_normalize: HashSet<String>,
    index_calls: AtomicUsize,
    detail_calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(index: Vec<Value>) -> Self {
        Self {
            index,
            fail_index: false,
            failing_details: HashSet::new(),
            failing_normalize: HashSet::new(),
            index_calls: AtomicUsize::new(0),
            detail_calls: Mutex::new(Vec::new()),
        }
    }

    /// Every index fetch fails
    pub fn failing_index(mut self) -> Self {
        self.fail_index = true;
        self
    }

    /// Every detail fetch for `id` fails
    pub fn failing_detail(mut self, id: &str) -> Self {
        self.failing_details.insert(id.to_string());
        self
    }

    /// Every `normalize` call for `id` fails
    pub fn failing_normalize(mut self, id: &str) -> Self {
        self.failing_normalize.insert(id.to_string());
        self
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    /// Ids passed to `fetch_detail`, one entry per attempt
    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Source for FakeSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn field_rules(&self) -> FieldRules {
        FieldRules::new(["id"], ["title"])
    }

    async fn fetch_index(&self, pages: &PageSender) -> Result<Vec<IndexRecord>> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_index {
            anyhow::bail!("index unavailable");
        }
        let _ = pages.send(IndexPage {
            page: 1,
            records: self.index.len(),
        });
        Ok(self.index.clone())
    }

    fn extract_id(&self, record: &IndexRecord) -> Option<String> {
        record.get("id").and_then(first_scalar)
    }

    async fn fetch_detail(&self, id: &str) -> Result<Vec<u8>> {
        self.detail_calls.lock().unwrap().push(id.to_string());
        if self.failing_details.contains(id) {
            anyhow::bail!("detail for {} unavailable", id);
        }
        Ok(format!("<html><body>{}{}</body></html>", id, " lorem".repeat(40)).into_bytes())
    }

    fn normalize(
        &self,
        id: &str,
        record: &IndexRecord,
        _detail: Option<&[u8]>,
    ) -> Result<NormalizedRecord> {
        if self.failing_normalize.contains(id) {
            anyhow::bail!("cannot normalize {}", id);
        }
        let field = |key: &str| record.get(key).and_then(first_scalar);

        Ok(NormalizedRecord::new(
            format!("{}:{}", SOURCE_NAME, id),
            SOURCE_NAME,
            field("title").unwrap_or_default(),
            format!("https://example.org/calls/{}", id),
            record.clone(),
        )
        .with_call_id(id)
        .with_dates(field("open"), field("close")))
    }
}

/// Index record with an id, a title and a close date
pub fn call(id: &str, title: &str) -> Value {
    call_closing(id, title, "2025-06-30")
}

/// Index record with explicit title and close date
pub fn call_closing(id: &str, title: &str, close: &str) -> Value {
    json!({ "id": id, "title": title, "close": close })
}

/// No waiting between attempts or requests
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy::new(3, Duration::ZERO),
        request_delay_ms: 0,
        ..PipelineSettings::default()
    }
}

pub async fn open(source: &Arc<FakeSource>, out_dir: &Path) -> Orchestrator {
    open_with(source, out_dir, fast_settings()).await
}

pub async fn open_with(
    source: &Arc<FakeSource>,
    out_dir: &Path,
    settings: PipelineSettings,
) -> Orchestrator {
    let source: Arc<dyn Source> = source.clone();
    Orchestrator::open(source, out_dir, settings).await.unwrap()
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> T {
    let content = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&content).unwrap()
}

/// Audit events of one type, oldest first
pub async fn events_of(out_dir: &Path, event_type: EventType) -> Vec<AuditEvent> {
    AuditLog::open(out_dir)
        .replay()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == event_type)
        .collect()
}

pub fn normalized_ids(out_dir: &Path) -> Vec<String> {
    let records: Vec<NormalizedRecord> = read_json(&out_dir.join("normalized.json"));
    records.into_iter().map(|r| r.id).collect()
}
