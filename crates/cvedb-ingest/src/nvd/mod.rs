//! Remote CVE catalog access
//!
//! - **client**: HTTP client for the NVD CVE 2.0 API
//! - **retry**: optional bounded retry with backoff around any [`PageSource`]

pub mod client;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use client::NvdClient;
pub use retry::{RetryPolicy, RetryingSource};

/// One page of raw records as returned by the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Total number of records the source reports for the whole query.
    /// Only the value from the first request of a run is relied upon.
    pub total_results: u64,
    pub start_index: u64,
    pub results_per_page: u64,
    /// The object under each `vulnerabilities[].cve`, or `Value::Null` when
    /// an element had no `cve` key.
    pub records: Vec<Value>,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A paginated source of raw CVE records.
///
/// Implementations report failures as `SourceUnavailable`,
/// `SourceRateLimited` or `SourceMalformed` and never retry on their own.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, start_index: u64, page_size: u64) -> Result<Page>;
}

#[async_trait]
impl<S: PageSource + ?Sized> PageSource for std::sync::Arc<S> {
    async fn fetch_page(&self, start_index: u64, page_size: u64) -> Result<Page> {
        (**self).fetch_page(start_index, page_size).await
    }
}
