//! cvedb Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging setup and error handling for the cvedb workspace.
//!
//! # Overview
//!
//! - **Types**: the canonical CVE record stored locally ([`types::CveRecord`])
//! - **Logging**: `tracing` subscriber initialization ([`logging`])
//! - **Error Handling**: [`CveDbError`] and the [`Result`] alias
//!
//! # Example
//!
//! ```no_run
//! use cvedb_common::types::parse_nvd_timestamp;
//!
//! fn main() -> cvedb_common::Result<()> {
//!     let published = parse_nvd_timestamp("1998-09-30T22:30:00.000")?;
//!     assert_eq!(published.to_rfc3339(), "1998-09-30T22:30:00+00:00");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CveDbError, Result};
