//! Error types shared across cvedb crates

use thiserror::Error;

/// Result type alias for cvedb operations
pub type Result<T> = std::result::Result<T, CveDbError>;

/// Main error type for shared cvedb functionality
#[derive(Error, Debug)]
pub enum CveDbError {
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}
