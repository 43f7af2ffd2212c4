//! In-memory CVE store
//!
//! Same contract as the PostgreSQL store, backed by a `HashMap`. Used by the
//! pipeline tests and by `import --dry-run`.

use async_trait::async_trait;
use chrono::Utc;
use cvedb_common::types::CveRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::{
    CveFilter, CveStore, Paginated, PaginationParams, StoreConnector, StoreError, StoreResult,
};

// Lock poisoning only happens if a writer panicked mid-update; the map
// itself is still consistent because every write is a single insert.
macro_rules! read_map {
    ($lock:expr) => {
        $lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    };
}

macro_rules! write_map {
    ($lock:expr) => {
        $lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    };
}

#[derive(Default)]
pub struct InMemoryCveStore {
    records: RwLock<HashMap<String, CveRecord>>,
    closed: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryCveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records`
    pub fn with_records(records: impl IntoIterator<Item = CveRecord>) -> Self {
        let store = Self::new();
        write_map!(store.records).extend(records.into_iter().map(|r| (r.id.clone(), r)));
        store
    }

    /// Snapshot of one record, bypassing the closed check
    pub fn get(&self, id: &str) -> Option<CveRecord> {
        read_map!(self.records).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        read_map!(self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful inserts and saves
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CveStore for InMemoryCveStore {
    async fn find_one(&self, id: &str) -> StoreResult<Option<CveRecord>> {
        self.ensure_open()?;
        Ok(read_map!(self.records).get(id).cloned())
    }

    async fn insert(&self, record: &CveRecord) -> StoreResult<()> {
        self.ensure_open()?;
        let mut map = write_map!(self.records);
        if map.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        map.insert(record.id.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save(&self, record: &CveRecord) -> StoreResult<()> {
        self.ensure_open()?;
        let mut map = write_map!(self.records);
        match map.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None => Err(StoreError::NotFound(record.id.clone())),
        }
    }

    async fn list(
        &self,
        filter: &CveFilter,
        pagination: &PaginationParams,
    ) -> StoreResult<Paginated<CveRecord>> {
        self.ensure_open()?;
        let now = Utc::now();

        let mut matching: Vec<CveRecord> = read_map!(self.records)
            .values()
            .filter(|r| filter.matches(r, now))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));

        let total = matching.len() as i64;
        let data = matching
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();

        Ok(Paginated::new(pagination, total, data))
    }

    async fn count(&self) -> StoreResult<u64> {
        self.ensure_open()?;
        Ok(read_map!(self.records).len() as u64)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out one shared in-memory store.
///
/// `connect` reopens the store, so the same instance can back several runs
/// (used to check rerun idempotence).
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    store: Arc<InMemoryCveStore>,
}

impl InMemoryConnector {
    pub fn new(store: Arc<InMemoryCveStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<InMemoryCveStore> {
        &self.store
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn CveStore>> {
        self.store.closed.store(false, Ordering::SeqCst);
        let store: Arc<dyn CveStore> = self.store.clone();
        Ok(store)
    }
}
