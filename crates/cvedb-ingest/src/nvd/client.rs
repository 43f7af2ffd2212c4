//! HTTP client for the NVD CVE 2.0 API
//!
//! One GET per page with `startIndex` and `resultsPerPage` query parameters.
//! The response body is expected to look like:
//!
//! ```json
//! {
//!   "resultsPerPage": 200,
//!   "startIndex": 0,
//!   "totalResults": 245123,
//!   "vulnerabilities": [ { "cve": { "id": "CVE-1999-0001", ... } } ]
//! }
//! ```

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{Page, PageSource};
use crate::error::{IngestError, Result};

/// Client for the remote CVE catalog
#[derive(Debug, Clone)]
pub struct NvdClient {
    client: Client,
    base_url: String,
}

impl NvdClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cvedb/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PageSource for NvdClient {
    async fn fetch_page(&self, start_index: u64, page_size: u64) -> Result<Page> {
        debug!(start_index, page_size, url = %self.base_url, "Requesting page");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("startIndex", start_index), ("resultsPerPage", page_size)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(status_error(status, retry_after_secs));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| IngestError::SourceMalformed(format!("response is not JSON: {}", e)))?;

        parse_page(body)
    }
}

fn status_error(status: StatusCode, retry_after_secs: Option<u64>) -> IngestError {
    match status {
        // NVD answers 403 instead of 429 when the rolling request window is exhausted.
        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => IngestError::SourceRateLimited {
            status: status.as_u16(),
            retry_after_secs,
        },
        s => IngestError::SourceUnavailable(format!("HTTP {}", s)),
    }
}

/// Extract a [`Page`] from a decoded response body.
pub fn parse_page(mut body: Value) -> Result<Page> {
    let total_results = body
        .get("totalResults")
        .and_then(Value::as_u64)
        .ok_or_else(|| IngestError::SourceMalformed("missing integer 'totalResults'".into()))?;

    let start_index = body.get("startIndex").and_then(Value::as_u64).unwrap_or(0);
    let results_per_page = body
        .get("resultsPerPage")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let vulnerabilities = match body.get_mut("vulnerabilities").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => {
            return Err(IngestError::SourceMalformed(
                "missing 'vulnerabilities' list".into(),
            ))
        },
    };

    let records = vulnerabilities
        .into_iter()
        .map(|mut item| item.get_mut("cve").map(Value::take).unwrap_or(Value::Null))
        .collect();

    Ok(Page {
        total_results,
        start_index,
        results_per_page,
        records,
    })
}
