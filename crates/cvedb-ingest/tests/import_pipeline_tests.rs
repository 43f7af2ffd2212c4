//! End-to-end tests for the import pipeline
//!
//! The orchestrator runs against a scripted in-process source and the
//! in-memory store. Coverage includes:
//! - Completeness and rerun idempotence
//! - Bounded write concurrency and the page barrier
//! - Skipped and failed records
//! - Early exhaustion of the source
//! - Fatal errors at connect, probe and mid-run, and store release on each

use async_trait::async_trait;
use cvedb_common::types::CveRecord;
use cvedb_ingest::error::{IngestError, Result};
use cvedb_ingest::nvd::{Page, PageSource};
use cvedb_ingest::orchestrator::{ImportOptions, Importer};
use cvedb_ingest::sink::{RecordSink, StoreSink, UpsertOutcome};
use cvedb_ingest::store::{
    CveStore, InMemoryConnector, InMemoryCveStore, StoreConnector, StoreError, StoreResult,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test doubles
// ============================================================================

fn raw_cve(i: usize, status: &str, references: usize) -> Value {
    json!({
        "id": format!("CVE-2020-{:05}", i),
        "sourceIdentifier": "cve@mitre.org",
        "published": "2020-03-01T10:15:00.000",
        "lastModified": "2024-11-20T17:57:50.607",
        "vulnStatus": status,
        "descriptions": [{ "lang": "en", "value": format!("Vulnerability {}", i) }],
        "references": (0..references)
            .map(|r| json!({ "url": format!("https://example.com/{}/{}", i, r), "source": "cve@mitre.org" }))
            .collect::<Vec<_>>()
    })
}

fn raw_catalog(count: usize) -> Vec<Value> {
    (0..count).map(|i| raw_cve(i, "Analyzed", 2)).collect()
}

/// Serves slices of a fixed record list and logs every request.
struct FakeSource {
    total: u64,
    records: Vec<Value>,
    fail_probe: bool,
    fail_at: Option<u64>,
    /// `(start_index, page_size)` of every request, probe included
    calls: Mutex<Vec<(u64, u64)>>,
    /// Store write count observed at each page fetch
    observed: Option<Arc<InMemoryCveStore>>,
    writes_at_fetch: Mutex<Vec<(u64, u64)>>,
}

impl FakeSource {
    fn new(records: Vec<Value>) -> Self {
        Self {
            total: records.len() as u64,
            records,
            fail_probe: false,
            fail_at: None,
            calls: Mutex::new(Vec::new()),
            observed: None,
            writes_at_fetch: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn fetch_page(&self, start_index: u64, page_size: u64) -> Result<Page> {
        self.calls.lock().unwrap().push((start_index, page_size));

        let is_probe = start_index == 0 && page_size == 1;
        if is_probe && self.fail_probe {
            return Err(IngestError::SourceUnavailable("connection refused".into()));
        }
        if !is_probe && self.fail_at == Some(start_index) {
            return Err(IngestError::SourceUnavailable("HTTP 503 Service Unavailable".into()));
        }
        if let (false, Some(store)) = (is_probe, &self.observed) {
            self.writes_at_fetch
                .lock()
                .unwrap()
                .push((start_index, store.write_count()));
        }

        let start = (start_index as usize).min(self.records.len());
        let end = (start + page_size as usize).min(self.records.len());
        Ok(Page {
            total_results: self.total,
            start_index,
            results_per_page: page_size,
            records: self.records[start..end].to_vec(),
        })
    }
}

struct FailingConnector;

#[async_trait]
impl StoreConnector for FailingConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn CveStore>> {
        Err(StoreError::Sqlx(sqlx::Error::PoolTimedOut))
    }
}

/// Wraps a sink, tracking the peak number of concurrent upserts.
struct TrackingSink {
    inner: StoreSink,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    reject: Option<String>,
}

#[async_trait]
impl RecordSink for TrackingSink {
    async fn upsert(&self, record: CveRecord) -> Result<UpsertOutcome> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.reject.as_deref() == Some(record.id.as_str()) {
            return Err(IngestError::sink_write(&record.id, "constraint violation"));
        }
        self.inner.upsert(record).await
    }
}

fn options(page_size: u64, concurrency: usize) -> ImportOptions {
    ImportOptions {
        page_size,
        delay: Duration::ZERO,
        concurrency,
    }
}

fn importer(
    source: Arc<FakeSource>,
    store: &Arc<InMemoryCveStore>,
    options: ImportOptions,
) -> Importer<Arc<FakeSource>> {
    Importer::new(source, Arc::new(InMemoryConnector::new(store.clone())), options)
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_imports_every_record() {
    let store = Arc::new(InMemoryCveStore::new());
    let source = Arc::new(FakeSource::new(raw_catalog(450)));

    let summary = importer(source.clone(), &store, options(200, 5)).run().await.unwrap();

    assert_eq!(summary.total, 450);
    assert_eq!(summary.processed, 450);
    assert_eq!(summary.inserted, 450);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.pages_fetched, 3);
    assert_eq!(summary.final_start_index, 600);
    assert!(!summary.exhausted_early);
    assert_eq!(store.len(), 450);
    assert_eq!(store.write_count(), 450);

    assert_eq!(source.calls(), vec![(0, 1), (0, 200), (200, 200), (400, 200)]);

    let stored = store.get("CVE-2020-00042").unwrap();
    assert_eq!(stored.vuln_status.as_deref(), Some("Analyzed"));
    assert_eq!(stored.references.len(), 2);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let store = Arc::new(InMemoryCveStore::new());
    let source = Arc::new(FakeSource::new(raw_catalog(120)));

    importer(source.clone(), &store, options(50, 4)).run().await.unwrap();
    let first: Vec<CveRecord> = (0..120)
        .map(|i| store.get(&format!("CVE-2020-{:05}", i)).unwrap())
        .collect();

    let summary = importer(source, &store, options(50, 4)).run().await.unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.updated, 120);
    assert_eq!(store.len(), 120);

    let second: Vec<CveRecord> = (0..120)
        .map(|i| store.get(&format!("CVE-2020-{:05}", i)).unwrap())
        .collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_existing_record_is_fully_overwritten() {
    let stale = cvedb_ingest::transform::transform(&raw_cve(7, "Modified", 3)).unwrap();
    let store = Arc::new(InMemoryCveStore::with_records([stale]));
    let source = Arc::new(FakeSource::new(vec![raw_cve(7, "Analyzed", 2)]));

    let summary = importer(source, &store, options(10, 2)).run().await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.processed, 1);

    let stored = store.get("CVE-2020-00007").unwrap();
    assert_eq!(stored.vuln_status.as_deref(), Some("Analyzed"));
    assert_eq!(stored.references.len(), 2);
    assert!(stored
        .references
        .iter()
        .all(|r| r.url.as_deref().is_some_and(|u| u.starts_with("https://example.com/7/"))));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let store = Arc::new(InMemoryCveStore::new());
    let source = Arc::new(FakeSource::new(raw_catalog(60)));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (a, p) = (active.clone(), peak.clone());
    let summary = importer(source, &store, options(20, 3))
        .with_sink(move |store: Arc<dyn CveStore>| -> Arc<dyn RecordSink> {
            Arc::new(TrackingSink {
                inner: StoreSink::new(store),
                active: a.clone(),
                peak: p.clone(),
                reject: None,
            })
        })
        .run()
        .await
        .unwrap();

    assert_eq!(summary.processed, 60);
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=3).contains(&peak), "peak concurrency was {}", peak);
    assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_page_is_drained_before_next_fetch() {
    let store = Arc::new(InMemoryCveStore::new());
    let mut source = FakeSource::new(raw_catalog(250));
    source.observed = Some(store.clone());
    let source = Arc::new(source);

    importer(source.clone(), &store, options(100, 5)).run().await.unwrap();

    assert_eq!(
        *source.writes_at_fetch.lock().unwrap(),
        vec![(0, 0), (100, 100), (200, 200)]
    );
}

// ============================================================================
// Per-record failures
// ============================================================================

#[tokio::test]
async fn test_record_without_id_is_skipped() {
    let mut records = raw_catalog(10);
    records[3].as_object_mut().unwrap().remove("id");
    records[6] = Value::Null;

    let store = Arc::new(InMemoryCveStore::new());
    let summary = importer(Arc::new(FakeSource::new(records)), &store, options(5, 2))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.processed, 8);
    assert_eq!(store.len(), 8);
}

#[tokio::test]
async fn test_sink_failure_does_not_stop_the_run() {
    let store = Arc::new(InMemoryCveStore::new());
    let source = Arc::new(FakeSource::new(raw_catalog(30)));

    let summary = importer(source, &store, options(10, 3))
        .with_sink(|store: Arc<dyn CveStore>| -> Arc<dyn RecordSink> {
            Arc::new(TrackingSink {
                inner: StoreSink::new(store),
                active: Arc::default(),
                peak: Arc::default(),
                reject: Some("CVE-2020-00012".to_string()),
            })
        })
        .run()
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 29);
    assert!(store.get("CVE-2020-00012").is_none());
    assert!(store.get("CVE-2020-00029").is_some());
}

// ============================================================================
// Termination
// ============================================================================

#[tokio::test]
async fn test_empty_page_ends_run_early() {
    let mut source = FakeSource::new(raw_catalog(200));
    source.total = 500;
    let source = Arc::new(source);
    let store = Arc::new(InMemoryCveStore::new());

    let summary = importer(source.clone(), &store, options(200, 5)).run().await.unwrap();

    assert_eq!(summary.total, 500);
    assert_eq!(summary.processed, 200);
    assert!(summary.exhausted_early);
    assert_eq!(summary.final_start_index, 200);
    assert_eq!(source.calls().last(), Some(&(200, 200)));
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_zero_total_fetches_only_the_probe() {
    let source = Arc::new(FakeSource::new(Vec::new()));
    let store = Arc::new(InMemoryCveStore::new());

    let summary = importer(source.clone(), &store, options(200, 5)).run().await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.pages_fetched, 0);
    assert_eq!(source.calls(), vec![(0, 1)]);
}

#[tokio::test(start_paused = true)]
async fn test_delay_only_between_pages() {
    let source = Arc::new(FakeSource::new(raw_catalog(30)));
    let store = Arc::new(InMemoryCveStore::new());
    let options = ImportOptions {
        page_size: 10,
        delay: Duration::from_secs(5),
        concurrency: 2,
    };

    let started = tokio::time::Instant::now();
    importer(source, &store, options).run().await.unwrap();
    let elapsed = started.elapsed();

    // Three pages, two pauses.
    assert!(elapsed >= Duration::from_secs(10), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(15), "elapsed {:?}", elapsed);
}

// ============================================================================
// Fatal errors
// ============================================================================

#[tokio::test]
async fn test_unreachable_store_fails_before_fetching() {
    let source = Arc::new(FakeSource::new(raw_catalog(10)));

    let err = Importer::new(source.clone(), Arc::new(FailingConnector), options(5, 2))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::StoreUnavailable(_)));
    assert!(source.calls().is_empty());
}

#[tokio::test]
async fn test_probe_failure_is_fatal() {
    let mut source = FakeSource::new(raw_catalog(10));
    source.fail_probe = true;
    let store = Arc::new(InMemoryCveStore::new());

    let importer = importer(Arc::new(source), &store, options(5, 2));
    let err = importer.run().await.unwrap_err();

    assert!(!importer.progress().is_started());
    assert!(matches!(err.cause(), IngestError::ProbeFailed(_)));
    assert!(err.is_fatal());
    let partial = err.partial_summary().unwrap();
    assert_eq!(partial.total, 0);
    assert_eq!(partial.pages_fetched, 0);
    assert!(store.is_empty());
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_mid_run_fetch_failure_keeps_prior_writes() {
    let mut source = FakeSource::new(raw_catalog(600));
    source.fail_at = Some(400);
    let store = Arc::new(InMemoryCveStore::new());

    let err = importer(Arc::new(source), &store, options(200, 5))
        .run()
        .await
        .unwrap_err();

    match err.cause() {
        IngestError::PageFetchFailed {
            start_index,
            processed,
            ..
        } => {
            assert_eq!(*start_index, 400);
            assert_eq!(*processed, 400);
        },
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(store.len(), 400);
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_fetch_failure_reports_partial_counts() {
    let mut records = raw_catalog(600);
    records[10].as_object_mut().unwrap().remove("id");
    let mut source = FakeSource::new(records);
    source.fail_at = Some(400);
    let store = Arc::new(InMemoryCveStore::new());

    let err = importer(Arc::new(source), &store, options(200, 5))
        .run()
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(
        err.cause(),
        IngestError::PageFetchFailed { start_index: 400, processed: 399, .. }
    ));

    let partial = err.partial_summary().unwrap();
    assert_eq!(partial.total, 600);
    assert_eq!(partial.processed, 399);
    assert_eq!(partial.inserted, 399);
    assert_eq!(partial.updated, 0);
    assert_eq!(partial.skipped, 1);
    assert_eq!(partial.failed, 0);
    assert_eq!(partial.pages_fetched, 2);
    assert_eq!(partial.final_start_index, 400);

    let message = err.to_string();
    assert!(message.contains("399 inserted"));
    assert!(message.contains("1 skipped"));
    assert_eq!(store.len(), 399);
}
