//! Error types for the CVE import pipeline
//!
//! The variants follow how far a failure reaches:
//!
//! - **Fatal** (abort the run before or during setup): [`IngestError::Config`],
//!   [`IngestError::StoreUnavailable`], [`IngestError::ProbeFailed`]
//! - **Per-page fatal** (abort, keeping prior upserts): [`IngestError::PageFetchFailed`]
//! - **Per-record** (counted, never stop the run): [`IngestError::TransformInvalid`],
//!   [`IngestError::SinkWrite`]
//! - **Source client** errors, which the orchestrator wraps in one of the above:
//!   [`IngestError::SourceUnavailable`], [`IngestError::SourceRateLimited`],
//!   [`IngestError::SourceMalformed`]

use thiserror::Error;

use crate::orchestrator::ImportSummary;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Network failure, timeout or 5xx from the remote catalog
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The remote catalog asked us to slow down
    #[error("Source rate limited (HTTP {status}){}", retry_hint(.retry_after_secs))]
    SourceRateLimited {
        status: u16,
        retry_after_secs: Option<u64>,
    },

    /// Response did not have the expected page shape
    #[error("Malformed source response: {0}")]
    SourceMalformed(String),

    /// Raw record had no usable identifier
    #[error("Invalid record: {0}")]
    TransformInvalid(String),

    /// Storage rejected a single record
    #[error("Failed to write {id}: {message}")]
    SinkWrite { id: String, message: String },

    /// The backing store could not be reached at startup
    #[error("Store unavailable: {0}. Check DATABASE_URL and that the database is reachable.")]
    StoreUnavailable(String),

    /// The initial count request failed, so there is no bound to import against
    #[error("Could not determine total result count: {0}")]
    ProbeFailed(#[source] Box<IngestError>),

    /// A page fetch failed mid-run; upserts made before it stay committed
    #[error(
        "Page fetch failed at startIndex {start_index} after {processed} records were processed: {source}"
    )]
    PageFetchFailed {
        start_index: u64,
        processed: u64,
        #[source]
        source: Box<IngestError>,
    },

    /// A run that had connected the store stopped on a fatal error. `summary`
    /// holds the counts up to that point; `source` is the `ProbeFailed` or
    /// `PageFetchFailed` that ended it.
    #[error("Import aborted: {source}. {summary}")]
    Aborted {
        summary: Box<ImportSummary>,
        #[source]
        source: Box<IngestError>,
    },

    /// A record was enqueued after the work queue shut down
    #[error("Work queue is shut down")]
    QueueClosed,

    /// Required setting missing or invalid
    #[error("Configuration error: {0}. Check your environment variables or .env file.")]
    Config(String),
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(", retry after {}s", secs),
        None => String::new(),
    }
}

impl IngestError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::SourceUnavailable(_) | IngestError::SourceRateLimited { .. }
        )
    }

    /// Whether this error ends the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Config(_)
                | IngestError::StoreUnavailable(_)
                | IngestError::ProbeFailed(_)
                | IngestError::PageFetchFailed { .. }
                | IngestError::Aborted { .. }
        )
    }

    /// The error that ended the run, looking through `Aborted`.
    pub fn cause(&self) -> &IngestError {
        match self {
            IngestError::Aborted { source, .. } => source.cause(),
            other => other,
        }
    }

    /// Counts of an aborted run, if it got far enough to have any.
    pub fn partial_summary(&self) -> Option<&ImportSummary> {
        match self {
            IngestError::Aborted { summary, .. } => Some(summary),
            _ => None,
        }
    }

    pub fn sink_write(id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::SinkWrite {
            id: id.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IngestError::SourceMalformed(err.to_string())
        } else {
            IngestError::SourceUnavailable(err.to_string())
        }
    }
}
