//! Pipeline Integration Tests
//!
//! End-to-end runs against a scripted source: artifacts, partial failure,
//! fatal index failure, caching and index validation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use common::{
    call, call_closing, events_of, fast_settings, normalized_ids, open, open_with, read_json,
    FakeSource,
};
use grantscrape::core::changes::load_snapshot;
use grantscrape::core::{AuditLog, RetryPolicy, UpdateReport};
use grantscrape::domain::{
    CheckpointState, EventType, IndexValidationError, NormalizedRecord, Phase, ValidationReport,
};

#[tokio::test]
async fn test_full_run_writes_all_artifacts() {
    let temp = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(vec![
        call("A", "Alpha research call"),
        call("B", "Beta innovation call"),
    ]));

    let summary = open(&source, temp.path()).await.run(None).await.unwrap();

    assert_eq!(summary.source, "fake");
    assert_eq!(summary.completed_ids, 2);
    assert_eq!(summary.failed_ids, 0);
    assert_eq!(summary.audit_summary[&EventType::ItemProcessed], 2);
    assert_eq!(summary.audit_summary[&EventType::DetailFetched], 2);

    for file in [
        "raw_index.json",
        "index_validation_errors.json",
        "normalized.json",
        "validation_report.json",
        "run_summary.json",
        "checkpoint.json",
        "audit_log.jsonl",
        "html/A.html",
        "records/A.json",
    ] {
        assert!(temp.path().join(file).exists(), "missing {}", file);
    }

    assert_eq!(normalized_ids(temp.path()), vec!["fake:A", "fake:B"]);

    let errors: Vec<IndexValidationError> =
        read_json(&temp.path().join("index_validation_errors.json"));
    assert!(errors.is_empty());

    let checkpoint: CheckpointState = read_json(&temp.path().join("checkpoint.json"));
    assert_eq!(checkpoint.phase, Phase::Complete);
    assert!(checkpoint.is_completed("A") && checkpoint.is_completed("B"));
}

#[tokio::test]
async fn test_partial_failure_then_resume() {
    let temp = TempDir::new().unwrap();
    let index = vec![
        call("A", "Alpha research call"),
        call("B", "Beta innovation call"),
        call("C", "Gamma pilot call"),
    ];

    // First run: B fails on every attempt
    let flaky = Arc::new(FakeSource::new(index.clone()).failing_detail("B"));
    let summary = open(&flaky, temp.path()).await.run(None).await.unwrap();

    assert_eq!(summary.completed_ids, 2);
    assert_eq!(summary.failed_ids, 1);
    assert_eq!(flaky.detail_calls().iter().filter(|id| *id == "B").count(), 3);
    assert_eq!(normalized_ids(temp.path()), vec!["fake:A", "fake:C"]);

    let events = AuditLog::open(temp.path()).replay().await.unwrap();
    let failure = events
        .iter()
        .find(|e| e.event_type == EventType::ItemFailed)
        .unwrap();
    assert_eq!(failure.details["item_id"], "B");
    assert!(failure.details["error"].as_str().unwrap().contains("unavailable"));

    // Second run: only B is fetched again
    let healthy = Arc::new(FakeSource::new(index));
    let summary = open(&healthy, temp.path()).await.run(None).await.unwrap();

    assert_eq!(healthy.detail_calls(), vec!["B"]);
    assert_eq!(summary.completed_ids, 3);
    assert_eq!(summary.failed_ids, 0);
    assert_eq!(normalized_ids(temp.path()), vec!["fake:A", "fake:B", "fake:C"]);
}

#[tokio::test]
async fn test_rerun_fetches_no_details() {
    let temp = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(vec![
        call("A", "Alpha research call"),
        call("B", "Beta innovation call"),
    ]));

    open(&source, temp.path()).await.run(None).await.unwrap();
    let first: Vec<NormalizedRecord> = read_json(&temp.path().join("normalized.json"));

    let summary = open(&source, temp.path()).await.run(None).await.unwrap();
    let second: Vec<NormalizedRecord> = read_json(&temp.path().join("normalized.json"));

    assert_eq!(source.detail_calls().len(), 2);
    assert_eq!(source.index_calls(), 2);
    assert_eq!(first, second);
    assert_eq!(summary.audit_summary.get(&EventType::DetailFetched), None);
    assert_eq!(summary.audit_summary[&EventType::CheckpointResume], 1);
}

#[tokio::test(start_paused = true)]
async fn test_index_failure_is_fatal_after_retries() {
    let temp = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(vec![call("A", "Alpha research call")]).failing_index());
    let settings = grantscrape::core::PipelineSettings {
        retry: RetryPolicy::new(3, Duration::from_secs(1)),
        ..fast_settings()
    };

    let mut orchestrator = open_with(&source, temp.path(), settings).await;
    let start = tokio::time::Instant::now();
    let result = orchestrator.run(None).await;

    assert!(result.is_err());
    assert_eq!(source.index_calls(), 3);
    // Backoff of 1s then 2s between the three attempts
    assert_eq!(start.elapsed(), Duration::from_secs(3));

    assert!(!temp.path().join("normalized.json").exists());
    assert!(!temp.path().join("raw_index.json").exists());
    assert_eq!(orchestrator.checkpoint().phase(), Phase::FetchIndex);

    let events = AuditLog::open(temp.path()).replay().await.unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::PipelineError);
    assert!(last.details["error"].as_str().unwrap().contains("index unavailable"));

    let attempts = events_of(temp.path(), EventType::FetchAttemptFailed).await;
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|e| e.details["what"] == "fetch_index"));
    assert_eq!(attempts[0].details["retry_in_ms"], 1000);
    assert_eq!(attempts[1].details["retry_in_ms"], 2000);
    assert!(attempts[2].details["retry_in_ms"].is_null());
    assert!(events_of(temp.path(), EventType::IndexPageFetched).await.is_empty());
}

#[tokio::test]
async fn test_every_failed_detail_attempt_is_audited() {
    let temp = TempDir::new().unwrap();
    let source = Arc::new(
        FakeSource::new(vec![
            call("A", "Alpha research call"),
            call("B", "Beta innovation call"),
        ])
        .failing_detail("B"),
    );

    open(&source, temp.path()).await.run(None).await.unwrap();

    let pages = events_of(temp.path(), EventType::IndexPageFetched).await;
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].details["page"], 1);
    assert_eq!(pages[0].details["records"], 2);

    let attempts = events_of(temp.path(), EventType::FetchAttemptFailed).await;
    let numbers: Vec<_> = attempts.iter().map(|e| e.details["attempt"].clone()).collect();
    assert_eq!(numbers, vec![json!(1), json!(2), json!(3)]);
    assert!(attempts.iter().all(|e| e.details["item_id"] == "B"));
    assert!(attempts.iter().all(|e| e.details["what"] == "fetch_detail"));
    assert!(attempts[0].details["error"]
        .as_str()
        .unwrap()
        .contains("detail for B unavailable"));

    // One network call per audited attempt or fetch
    let fetched = events_of(temp.path(), EventType::DetailFetched).await;
    assert_eq!(source.detail_calls().len(), attempts.len() + fetched.len());
}

#[tokio::test]
async fn test_normalize_failure_is_isolated_to_the_item() {
    let temp = TempDir::new().unwrap();
    let source = Arc::new(
        FakeSource::new(vec![
            call("A", "Alpha research call"),
            call("B", "Beta innovation call"),
            call("C", "Gamma pilot call"),
        ])
        .failing_normalize("B"),
    );

    let summary = open(&source, temp.path()).await.run(None).await.unwrap();

    assert_eq!(summary.completed_ids, 2);
    assert_eq!(summary.failed_ids, 1);
    assert_eq!(normalized_ids(temp.path()), vec!["fake:A", "fake:C"]);

    let checkpoint: CheckpointState = read_json(&temp.path().join("checkpoint.json"));
    assert!(checkpoint.is_failed("B"));
    assert!(!checkpoint.is_completed("B"));

    let failures = events_of(temp.path(), EventType::ItemFailed).await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].details["item_id"], "B");
    assert!(failures[0].details["error"]
        .as_str()
        .unwrap()
        .contains("cannot normalize B"));

    // Fetched once, no retries for normalization, payload kept for next run
    assert_eq!(source.detail_calls().iter().filter(|id| *id == "B").count(), 1);
    assert!(temp.path().join("html/B.html").exists());
    assert!(!temp.path().join("records/B.json").exists());
}

#[tokio::test]
async fn test_index_changes_reach_rerun_output() {
    let temp = TempDir::new().unwrap();
    let first = Arc::new(FakeSource::new(vec![
        call_closing("A", "Old title here", "2025-06-30"),
        call("B", "Beta innovation call"),
    ]));
    open(&first, temp.path()).await.run(None).await.unwrap();

    let normalized_path = temp.path().join("normalized.json");
    let previous = load_snapshot(&normalized_path).await.unwrap();

    let second = Arc::new(FakeSource::new(vec![
        call_closing("A", "New title here", "2026-01-31"),
        call("B", "Beta innovation call"),
    ]));
    open(&second, temp.path()).await.run(None).await.unwrap();

    // Completed items are rebuilt from the cache, not refetched
    assert!(second.detail_calls().is_empty());

    let records: Vec<NormalizedRecord> = read_json(&normalized_path);
    assert_eq!(records[0].title, "New title here");
    assert_eq!(records[0].close_date.as_deref(), Some("2026-01-31"));
    assert_eq!(records[0].raw["title"], "New title here");

    let stored: NormalizedRecord = read_json(&temp.path().join("records/A.json"));
    assert_eq!(stored.title, "New title here");

    let current = load_snapshot(&normalized_path).await.unwrap();
    let report = UpdateReport::between("fake", &previous, &current);
    assert_eq!(report.changes.updated, 1);
    assert_eq!(report.changes.new, 0);
    assert_eq!(report.changes.deleted, 0);

    let changes = &report.updated_grants[0].changes;
    assert_eq!(report.updated_grants[0].id, "fake:A");
    assert_eq!(changes["title"].old.as_deref(), Some("Old title here"));
    assert_eq!(changes["title"].new.as_deref(), Some("New title here"));
    assert_eq!(changes["close_date"].new.as_deref(), Some("2026-01-31"));
}

#[tokio::test]
async fn test_invalid_index_records_are_kept_and_reported() {
    let temp = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(vec![
        call("A", "Alpha research call"),
        json!({ "id": "X" }),
        json!({ "title": "Orphan call without an id" }),
    ]));

    open(&source, temp.path()).await.run(None).await.unwrap();

    let raw: Vec<serde_json::Value> = read_json(&temp.path().join("raw_index.json"));
    assert_eq!(raw.len(), 3);

    let errors: Vec<IndexValidationError> =
        read_json(&temp.path().join("index_validation_errors.json"));
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].record_index, 1);
    assert_eq!(errors[0].errors, vec!["Missing title field"]);
    assert!(errors[0].record_sample.contains("\"X\""));
    assert_eq!(errors[1].record_index, 2);
    assert_eq!(errors[1].errors, vec!["Missing ID field"]);

    // X has an id, so it is still processed and flagged downstream
    assert_eq!(normalized_ids(temp.path()), vec!["fake:A", "fake:X"]);

    let report: ValidationReport = read_json(&temp.path().join("validation_report.json"));
    assert_eq!(report.total_grants, 2);
    assert_eq!(report.details.empty_titles, vec!["fake:X"]);
    assert_eq!(report.details.missing_dates, vec!["fake:X"]);
}

#[tokio::test]
async fn test_cached_detail_is_not_refetched() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("html")).unwrap();
    std::fs::write(temp.path().join("html/A.html"), "<html>cached</html>").unwrap();

    let source = Arc::new(FakeSource::new(vec![
        call("A", "Alpha research call"),
        call("B", "Beta innovation call"),
    ]));

    let summary = open(&source, temp.path()).await.run(None).await.unwrap();

    assert_eq!(source.detail_calls(), vec!["B"]);
    assert_eq!(summary.completed_ids, 2);

    let events = AuditLog::open(temp.path()).replay().await.unwrap();
    let cached: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::DetailCached)
        .collect();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].details["item_id"], "A");
}

#[tokio::test]
async fn test_limit_processes_first_ids_only() {
    let temp = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(vec![
        call("A", "Alpha research call"),
        call("B", "Beta innovation call"),
        call("C", "Gamma pilot call"),
    ]));

    let summary = open(&source, temp.path()).await.run(Some(2)).await.unwrap();

    assert_eq!(summary.completed_ids, 2);
    assert_eq!(source.detail_calls(), vec!["A", "B"]);
    assert_eq!(normalized_ids(temp.path()), vec!["fake:A", "fake:B"]);
}

#[tokio::test]
async fn test_duplicate_ids_are_processed_once() {
    let temp = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(vec![
        call("A", "First listing of A"),
        call("B", "Beta innovation call"),
        call("A", "Second listing of A"),
    ]));

    open(&source, temp.path()).await.run(None).await.unwrap();

    assert_eq!(source.detail_calls(), vec!["A", "B"]);

    let records: Vec<NormalizedRecord> = read_json(&temp.path().join("normalized.json"));
    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["fake:A", "fake:B"]);
    assert_eq!(records[0].title, "First listing of A");
}

#[tokio::test]
async fn test_encoding_problems_are_reported() {
    let temp = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new(vec![call("A", "Broken \u{FFFD} title text")]));

    open(&source, temp.path()).await.run(None).await.unwrap();

    let report: ValidationReport = read_json(&temp.path().join("validation_report.json"));
    assert_eq!(report.issues_found.suspicious_data, 1);
    assert_eq!(report.details.suspicious_data[0].grant_id, "fake:A");
    assert_eq!(report.details.suspicious_data[0].issue, "encoding_problems");
}
