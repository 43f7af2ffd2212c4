//! Import progress
//!
//! A monotonic processed-vs-total counter shared between the orchestrator and
//! the queue callbacks, mirrored onto an `indicatif` bar.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const BAR_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}, {eta})";

#[derive(Clone)]
pub struct ProgressReporter {
    processed: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    started: Arc<AtomicBool>,
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Reporter drawing a bar on stderr (suppressed when stderr is not a terminal).
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message("Importing CVEs");
        Self::with_bar(bar)
    }

    /// Reporter that counts without drawing anything
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        Self {
            processed: Arc::new(AtomicU64::new(0)),
            total: Arc::new(AtomicU64::new(0)),
            started: Arc::new(AtomicBool::new(false)),
            bar,
        }
    }

    pub fn start(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.processed.store(0, Ordering::SeqCst);
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.started.store(true, Ordering::SeqCst);
    }

    /// Count one confirmed write.
    pub fn increment(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }

    /// Finish the bar. A bar that was never started is cleared instead of
    /// reporting a count.
    pub fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) {
            self.bar.finish_and_clear();
            return;
        }
        self.bar.finish_with_message(format!(
            "Processed {}/{} CVEs",
            self.processed(),
            self.total()
        ));
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_restarts() {
        let progress = ProgressReporter::hidden();
        progress.start(3);
        progress.increment();
        progress.increment();
        assert_eq!(progress.processed(), 2);
        assert_eq!(progress.total(), 3);

        progress.stop();
        assert_eq!(progress.bar.message(), "Processed 2/3 CVEs");

        progress.start(10);
        assert_eq!(progress.processed(), 0);
    }

    #[test]
    fn test_stop_without_start_reports_no_count() {
        let progress = ProgressReporter::hidden();
        progress.bar.set_message("Importing CVEs");
        assert!(!progress.is_started());

        progress.stop();
        assert!(progress.bar.is_finished());
        assert!(!progress.bar.message().contains("Processed"));
    }

    #[tokio::test]
    async fn test_increment_from_many_tasks() {
        let progress = ProgressReporter::hidden();
        progress.start(400);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let progress = progress.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        progress.increment();
                    }
                })
            })
            .collect();
        futures::future::join_all(handles).await;

        assert_eq!(progress.processed(), 400);
    }
}
