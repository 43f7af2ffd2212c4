//! PostgreSQL CVE store
//!
//! Each record is one row of `cves`: the full document as JSONB plus the
//! columns the query side filters on (`published`, `last_modified`). The
//! schema ships as embedded migrations applied by [`PgConnector::connect`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvedb_common::types::CveRecord;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    CveFilter, CveStore, Paginated, PaginationParams, StoreConnector, StoreError, StoreResult,
};
use crate::config::DatabaseConfig;

pub struct PgCveStore {
    pool: PgPool,
}

impl PgCveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }
}

/// `PoolClosed` means `close()` already ran.
fn db_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolClosed => StoreError::Closed,
        other => StoreError::Sqlx(other),
    }
}

fn decode(document: Value) -> StoreResult<CveRecord> {
    Ok(serde_json::from_value(document)?)
}

/// Appends the `WHERE` clause for `filter`.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &CveFilter, now: DateTime<Utc>) {
    qb.push(" WHERE TRUE");

    if let Some(ref id) = filter.id {
        qb.push(" AND id = ").push_bind(id.clone());
    }

    match filter.published_range() {
        Some((start, end)) => {
            qb.push(" AND published >= ")
                .push_bind(start)
                .push(" AND published < ")
                .push_bind(end);
        },
        // A year with no representable range matches nothing.
        None if filter.year.is_some() => {
            qb.push(" AND FALSE");
        },
        None => {},
    }

    if let Some(score) = filter.score {
        qb.push(
            " AND EXISTS (SELECT 1 FROM jsonb_array_elements(\
             COALESCE(document->'metrics'->'cvssMetricV2', '[]'::jsonb) \
             || COALESCE(document->'metrics'->'cvssMetricV30', '[]'::jsonb) \
             || COALESCE(document->'metrics'->'cvssMetricV31', '[]'::jsonb)) AS m \
             WHERE (m->'cvssData'->>'baseScore')::float8 = ",
        )
        .push_bind(score)
        .push(")");
    }

    if let Some(since) = filter.modified_since(now) {
        qb.push(" AND last_modified >= ").push_bind(since);
    }
}

#[async_trait]
impl CveStore for PgCveStore {
    async fn find_one(&self, id: &str) -> StoreResult<Option<CveRecord>> {
        let document: Option<Value> =
            sqlx::query_scalar("SELECT document FROM cves WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        document.map(decode).transpose()
    }

    async fn insert(&self, record: &CveRecord) -> StoreResult<()> {
        let document = serde_json::to_value(record)?;

        let result = sqlx::query(
            r#"
            INSERT INTO cves (id, source_identifier, published, last_modified, vuln_status, document)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.id)
        .bind(&record.source_identifier)
        .bind(record.published)
        .bind(record.last_modified)
        .bind(&record.vuln_status)
        .bind(document)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::Duplicate(record.id.clone()))
            },
            Err(e) => Err(db_error(e)),
        }
    }

    async fn save(&self, record: &CveRecord) -> StoreResult<()> {
        let document = serde_json::to_value(record)?;

        let result = sqlx::query(
            r#"
            UPDATE cves
            SET source_identifier = $2,
                published = $3,
                last_modified = $4,
                vuln_status = $5,
                document = $6,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&record.id)
        .bind(&record.source_identifier)
        .bind(record.published)
        .bind(record.last_modified)
        .bind(&record.vuln_status)
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    async fn list(
        &self,
        filter: &CveFilter,
        pagination: &PaginationParams,
    ) -> StoreResult<Paginated<CveRecord>> {
        let now = Utc::now();

        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM cves");
        push_filter(&mut count_query, filter, now);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        let mut data_query = QueryBuilder::<Postgres>::new("SELECT document FROM cves");
        push_filter(&mut data_query, filter, now);
        data_query
            .push(" ORDER BY id LIMIT ")
            .push_bind(pagination.limit())
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let documents: Vec<Value> = data_query
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        let data = documents
            .into_iter()
            .map(decode)
            .collect::<StoreResult<Vec<_>>>()?;

        debug!(total, returned = data.len(), "Listed CVEs");
        Ok(Paginated::new(pagination, total, data))
    }

    async fn count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cves")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count.max(0) as u64)
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("Database pool closed");
    }
}

/// Opens a pool against `DATABASE_URL` and migrates the schema.
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: DatabaseConfig,
}

impl PgConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    pub async fn create_pool(&self) -> StoreResult<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .connect(&self.config.url)
            .await?;

        info!(
            max_connections = self.config.max_connections,
            "Database connection pool created"
        );

        Ok(pool)
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    async fn connect(&self) -> StoreResult<Arc<dyn CveStore>> {
        let store = PgCveStore::new(self.create_pool().await?);
        if let Err(e) = store.migrate().await {
            store.close().await;
            return Err(e);
        }

        let store: Arc<dyn CveStore> = Arc::new(store);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn where_clause(filter: &CveFilter) -> String {
        let now: DateTime<Utc> = "2024-12-01T00:00:00Z".parse().unwrap();
        let mut qb = QueryBuilder::<Postgres>::new("SELECT document FROM cves");
        push_filter(&mut qb, filter, now);
        qb.sql().to_string()
    }

    #[test]
    fn test_filter_sql() {
        assert_eq!(where_clause(&CveFilter::default()), "SELECT document FROM cves WHERE TRUE");

        let sql = where_clause(&CveFilter {
            id: Some("CVE-2021-44228".into()),
            year: Some(2021),
            last_modified_days: Some(7),
            ..Default::default()
        });
        assert!(sql.contains("id = $1"));
        assert!(sql.contains("published >= $2 AND published < $3"));
        assert!(sql.contains("last_modified >= $4"));
    }

    #[test]
    fn test_unrepresentable_year_matches_nothing() {
        let sql = where_clause(&CveFilter {
            year: Some(i32::MAX),
            ..Default::default()
        });
        assert!(sql.ends_with(" AND FALSE"));
        assert!(!sql.contains("published"));
    }

    #[test]
    fn test_unbounded_recency_window_adds_no_clause() {
        let sql = where_clause(&CveFilter {
            last_modified_days: Some(i64::MAX / 1000),
            ..Default::default()
        });
        assert!(!sql.contains("last_modified"));
    }
}
