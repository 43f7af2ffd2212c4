//! cvedb Ingest Library
//!
//! Bulk import of the NVD CVE catalog into a local store.
//!
//! # Pipeline
//!
//! - **nvd**: paginated source client (plus optional retry)
//! - **transform**: raw NVD record -> [`cvedb_common::types::CveRecord`]
//! - **sink**: find-or-create upsert by CVE id
//! - **queue**: bounded worker pool with a drain barrier
//! - **orchestrator**: walks the pages and ties the above together
//! - **progress**: processed vs total counter and progress bar
//! - **store**: PostgreSQL and in-memory stores, plus the query types
//!
//! # Example
//!
//! ```no_run
//! use cvedb_ingest::config::ImportConfig;
//! use cvedb_ingest::nvd::NvdClient;
//! use cvedb_ingest::orchestrator::{ImportOptions, Importer};
//! use cvedb_ingest::store::PgConnector;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ImportConfig::load()?;
//!     let client = NvdClient::new(&config.source_url, config.http_timeout())?;
//!     let connector = Arc::new(PgConnector::new(config.database.clone()));
//!
//!     let summary = Importer::new(client, connector, ImportOptions::from(&config))
//!         .run()
//!         .await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod nvd;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod sink;
pub mod store;
pub mod transform;

pub use error::{IngestError, Result};
