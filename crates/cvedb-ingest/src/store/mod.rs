//! Keyed CVE document storage
//!
//! [`CveStore`] is the persistence seam for the pipeline: lookup by natural
//! key, insert, full overwrite, and the filtered listing the query side uses.
//!
//! - **postgres**: JSONB documents in PostgreSQL (the production store)
//! - **memory**: a `HashMap` store for tests and dry runs
//! - **query**: filter and pagination types shared by both

pub mod memory;
pub mod postgres;
pub mod query;

use async_trait::async_trait;
use cvedb_common::types::CveRecord;
use std::sync::Arc;
use thiserror::Error;

pub use memory::{InMemoryConnector, InMemoryCveStore};
pub use postgres::{PgConnector, PgCveStore};
pub use query::{CveFilter, Paginated, PaginationParams};

/// Store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Stored document could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    /// Insert collided with an existing natural key
    #[error("CVE '{0}' already exists")]
    Duplicate(String),

    #[error("CVE '{0}' not found")]
    NotFound(String),

    #[error("Store is closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A collection of CVE records keyed by `id`, unique per id.
///
/// Writes to distinct keys may run concurrently; each write is a single
/// document/row and atomic on its own.
#[async_trait]
pub trait CveStore: Send + Sync {
    async fn find_one(&self, id: &str) -> StoreResult<Option<CveRecord>>;

    /// Insert a new record; `StoreError::Duplicate` if the id already exists.
    async fn insert(&self, record: &CveRecord) -> StoreResult<()>;

    /// Replace every field of the stored record with `record`.
    async fn save(&self, record: &CveRecord) -> StoreResult<()>;

    async fn list(
        &self,
        filter: &CveFilter,
        pagination: &PaginationParams,
    ) -> StoreResult<Paginated<CveRecord>>;

    async fn count(&self) -> StoreResult<u64>;

    /// Release the underlying connection(s). Further calls fail with `Closed`.
    async fn close(&self);
}

/// Opens a store at the start of an import run.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> StoreResult<Arc<dyn CveStore>>;
}
