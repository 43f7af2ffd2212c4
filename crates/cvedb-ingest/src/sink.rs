//! Upsert sink
//!
//! Finds the stored record by natural key, then inserts or fully overwrites.
//! There is no `lastModified` comparison: the last writer wins.

use async_trait::async_trait;
use cvedb_common::types::CveRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::store::{CveStore, StoreError};

/// What an upsert did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Destination for transformed records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Write one record; any failure is `IngestError::SinkWrite` for that record.
    async fn upsert(&self, record: CveRecord) -> Result<UpsertOutcome>;
}

/// [`RecordSink`] over a [`CveStore`]
pub struct StoreSink {
    store: Arc<dyn CveStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn CveStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordSink for StoreSink {
    async fn upsert(&self, record: CveRecord) -> Result<UpsertOutcome> {
        let existing = self
            .store
            .find_one(&record.id)
            .await
            .map_err(|e| IngestError::sink_write(&record.id, e))?;

        if existing.is_some() {
            self.store
                .save(&record)
                .await
                .map_err(|e| IngestError::sink_write(&record.id, e))?;
            return Ok(UpsertOutcome::Updated);
        }

        match self.store.insert(&record).await {
            Ok(()) => Ok(UpsertOutcome::Inserted),
            // Another writer inserted the same id between lookup and insert.
            Err(StoreError::Duplicate(_)) => {
                debug!(cve_id = %record.id, "Insert raced with another writer, overwriting");
                self.store
                    .save(&record)
                    .await
                    .map_err(|e| IngestError::sink_write(&record.id, e))?;
                Ok(UpsertOutcome::Updated)
            },
            Err(e) => Err(IngestError::sink_write(&record.id, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        CveFilter, InMemoryCveStore, Paginated, PaginationParams, StoreResult,
    };
    use cvedb_common::types::Reference;

    fn record(id: &str, status: &str, refs: usize) -> CveRecord {
        CveRecord {
            id: id.to_string(),
            vuln_status: Some(status.to_string()),
            references: (0..refs)
                .map(|i| Reference::new(format!("https://example.com/{}", i), None))
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_then_update() {
        let store = Arc::new(InMemoryCveStore::new());
        let sink = StoreSink::new(store.clone());

        let outcome = sink.upsert(record("CVE-1999-0334", "Modified", 3)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let outcome = sink.upsert(record("CVE-1999-0334", "Analyzed", 2)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let stored = store.get("CVE-1999-0334").unwrap();
        assert_eq!(stored.vuln_status.as_deref(), Some("Analyzed"));
        assert_eq!(stored.references.len(), 2);
        assert_eq!(store.len(), 1);
    }

    /// Reports "absent" on lookup but already holds the record, as if a
    /// concurrent writer got there first.
    struct RacingStore {
        inner: InMemoryCveStore,
    }

    #[async_trait]
    impl CveStore for RacingStore {
        async fn find_one(&self, _id: &str) -> StoreResult<Option<CveRecord>> {
            Ok(None)
        }

        async fn insert(&self, record: &CveRecord) -> StoreResult<()> {
            self.inner.insert(record).await
        }

        async fn save(&self, record: &CveRecord) -> StoreResult<()> {
            self.inner.save(record).await
        }

        async fn list(
            &self,
            filter: &CveFilter,
            pagination: &PaginationParams,
        ) -> StoreResult<Paginated<CveRecord>> {
            self.inner.list(filter, pagination).await
        }

        async fn count(&self) -> StoreResult<u64> {
            self.inner.count().await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_duplicate_insert_falls_back_to_save() {
        let store = Arc::new(RacingStore {
            inner: InMemoryCveStore::with_records([record("CVE-2021-44228", "Modified", 1)]),
        });
        let sink = StoreSink::new(store.clone());

        let outcome = sink.upsert(record("CVE-2021-44228", "Analyzed", 1)).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(
            store.inner.get("CVE-2021-44228").unwrap().vuln_status.as_deref(),
            Some("Analyzed")
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_sink_write() {
        let store = Arc::new(InMemoryCveStore::new());
        store.close().await;
        let sink = StoreSink::new(store);

        let err = sink.upsert(record("CVE-2020-0001", "Analyzed", 0)).await.unwrap_err();
        assert!(matches!(err, IngestError::SinkWrite { ref id, .. } if id == "CVE-2020-0001"));
    }
}
