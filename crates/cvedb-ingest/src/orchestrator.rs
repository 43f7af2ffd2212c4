//! Pagination orchestrator
//!
//! One import run walks the source page by page:
//!
//! 1. Connect the store. Failure is fatal before anything is fetched.
//! 2. Probe with a page size of 1 to learn `totalResults`.
//! 3. For each page: fetch, transform every record, enqueue it, wait for the
//!    queue to drain, advance `startIndex` by the page size and pause before
//!    the next page.
//! 4. Stop the progress bar, shut the queue down and close the store. This
//!    happens on every exit path, including fatal errors.
//!
//! A fatal error after step 1 comes back as [`IngestError::Aborted`], which
//! carries the summary of everything done before the stop.
//!
//! The next page is never fetched before the current one has drained, so at
//! most one page of records is in memory and writes from different pages
//! never interleave.

use cvedb_common::types::CveRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::error::{IngestError, Result};
use crate::nvd::PageSource;
use crate::progress::ProgressReporter;
use crate::queue::WorkQueue;
use crate::sink::{RecordSink, StoreSink, UpsertOutcome};
use crate::store::{CveStore, StoreConnector};
use crate::transform::transform;

/// Page size of the initial count request.
const PROBE_PAGE_SIZE: u64 = 1;

/// Pagination and concurrency settings for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub page_size: u64,
    pub delay: Duration,
    pub concurrency: usize,
}

impl From<&ImportConfig> for ImportOptions {
    fn from(config: &ImportConfig) -> Self {
        Self {
            page_size: config.results_per_page,
            delay: config.delay(),
            concurrency: config.concurrency,
        }
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    /// `totalResults` reported by the probe
    pub total: u64,
    /// Records written successfully (inserted + updated)
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Records rejected by the transformer
    pub skipped: u64,
    /// Records the sink failed to write
    pub failed: u64,
    pub pages_fetched: u64,
    pub final_start_index: u64,
    /// The source returned an empty page before `total` was reached
    pub exhausted_early: bool,
    pub duration_ms: u64,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {}/{} CVEs ({} inserted, {} updated, {} skipped, {} failed) in {} pages, {:.1}s",
            self.processed,
            self.total,
            self.inserted,
            self.updated,
            self.skipped,
            self.failed,
            self.pages_fetched,
            self.duration_ms as f64 / 1000.0
        )?;
        if self.exhausted_early {
            write!(f, "; source ran out at startIndex {}", self.final_start_index)?;
        }
        Ok(())
    }
}

/// Builds the sink the workers write through, given the run's store.
pub type SinkFactory = Box<dyn Fn(Arc<dyn CveStore>) -> Arc<dyn RecordSink> + Send + Sync>;

/// Per-record outcome tallies, updated from worker callbacks.
#[derive(Default)]
struct RunCounters {
    inserted: AtomicU64,
    updated: AtomicU64,
    failed: AtomicU64,
}

impl RunCounters {
    fn record(&self, outcome: Result<UpsertOutcome>, progress: &ProgressReporter) {
        match outcome {
            Ok(UpsertOutcome::Inserted) => {
                self.inserted.fetch_add(1, Ordering::SeqCst);
                progress.increment();
            },
            Ok(UpsertOutcome::Updated) => {
                self.updated.fetch_add(1, Ordering::SeqCst);
                progress.increment();
            },
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                warn!(error = %e, "Failed to upsert CVE");
            },
        }
    }
}

/// Orchestrator-owned cursor of a run
#[derive(Debug, Default)]
struct RunState {
    total: u64,
    start_index: u64,
    pages_fetched: u64,
    skipped: u64,
    exhausted_early: bool,
}

pub struct Importer<S> {
    source: S,
    connector: Arc<dyn StoreConnector>,
    options: ImportOptions,
    progress: ProgressReporter,
    sink_factory: SinkFactory,
}

impl<S: PageSource> Importer<S> {
    pub fn new(source: S, connector: Arc<dyn StoreConnector>, options: ImportOptions) -> Self {
        Self {
            source,
            connector,
            options,
            progress: ProgressReporter::hidden(),
            sink_factory: Box::new(|store: Arc<dyn CveStore>| -> Arc<dyn RecordSink> {
                Arc::new(StoreSink::new(store))
            }),
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the default [`StoreSink`], e.g. to wrap it with instrumentation.
    pub fn with_sink<F>(mut self, factory: F) -> Self
    where
        F: Fn(Arc<dyn CveStore>) -> Arc<dyn RecordSink> + Send + Sync + 'static,
    {
        self.sink_factory = Box::new(factory);
        self
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Run one import from `startIndex` 0 to the reported total.
    pub async fn run(&self) -> Result<ImportSummary> {
        let run_id = Uuid::new_v4();
        self.run_with_id(run_id)
            .instrument(info_span!("import", %run_id))
            .await
    }

    async fn run_with_id(&self, run_id: Uuid) -> Result<ImportSummary> {
        let started = Instant::now();

        let store = self
            .connector
            .connect()
            .await
            .map_err(|e| IngestError::StoreUnavailable(e.to_string()))?;
        debug!("Store connected");

        let sink = (self.sink_factory)(store.clone());
        let capacity = usize::try_from(self.options.page_size).unwrap_or(usize::MAX);
        let mut queue = WorkQueue::new(sink, self.options.concurrency, capacity);
        let counters = Arc::new(RunCounters::default());
        let mut state = RunState::default();

        let result = self.drive(&queue, &counters, &mut state).await;

        self.progress.stop();
        queue.shutdown().await;
        store.close().await;

        let inserted = counters.inserted.load(Ordering::SeqCst);
        let updated = counters.updated.load(Ordering::SeqCst);
        let summary = ImportSummary {
            run_id,
            total: state.total,
            processed: inserted + updated,
            inserted,
            updated,
            skipped: state.skipped,
            failed: counters.failed.load(Ordering::SeqCst),
            pages_fetched: state.pages_fetched,
            final_start_index: state.start_index,
            exhausted_early: state.exhausted_early,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        match result {
            Ok(()) => {
                info!(
                    total = summary.total,
                    processed = summary.processed,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    pages = summary.pages_fetched,
                    duration_ms = summary.duration_ms,
                    "Import complete"
                );
                Ok(summary)
            },
            Err(e) => {
                error!(
                    error = %e,
                    start_index = state.start_index,
                    total = summary.total,
                    processed = summary.processed,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "Import aborted"
                );
                Err(IngestError::Aborted {
                    summary: Box::new(summary),
                    source: Box::new(e),
                })
            },
        }
    }

    /// Probe and page loop. Returns early only on fatal errors.
    async fn drive(
        &self,
        queue: &WorkQueue,
        counters: &Arc<RunCounters>,
        state: &mut RunState,
    ) -> Result<()> {
        let page_size = self.options.page_size;

        let probe = self
            .source
            .fetch_page(0, PROBE_PAGE_SIZE)
            .await
            .map_err(|e| IngestError::ProbeFailed(Box::new(e)))?;
        state.total = probe.total_results;

        info!(
            total = state.total,
            page_size,
            concurrency = self.options.concurrency,
            "Starting CVE import"
        );
        self.progress.start(state.total);

        while state.start_index < state.total {
            let page = self
                .source
                .fetch_page(state.start_index, page_size)
                .await
                .map_err(|e| IngestError::PageFetchFailed {
                    start_index: state.start_index,
                    processed: self.progress.processed(),
                    source: Box::new(e),
                })?;
            state.pages_fetched += 1;

            if page.is_empty() {
                info!(
                    start_index = state.start_index,
                    total = state.total,
                    "Source returned no records before the reported total, stopping"
                );
                state.exhausted_early = true;
                break;
            }

            let records = page.records.len();
            for raw in &page.records {
                match transform(raw) {
                    Ok(record) => self.dispatch(queue, counters, record).await?,
                    Err(e) => {
                        state.skipped += 1;
                        warn!(start_index = state.start_index, error = %e, "Skipping record");
                    },
                }
            }

            queue.drain().await;
            debug!(
                start_index = state.start_index,
                records,
                processed = self.progress.processed(),
                "Page complete"
            );

            state.start_index += page_size;

            if state.start_index < state.total && !self.options.delay.is_zero() {
                debug!(delay_ms = self.options.delay.as_millis() as u64, "Waiting before next page");
                tokio::time::sleep(self.options.delay).await;
            }
        }

        Ok(())
    }

    async fn dispatch(
        &self,
        queue: &WorkQueue,
        counters: &Arc<RunCounters>,
        record: CveRecord,
    ) -> Result<()> {
        let counters = counters.clone();
        let progress = self.progress.clone();
        queue
            .enqueue(record, move |outcome| counters.record(outcome, &progress))
            .await
    }
}
