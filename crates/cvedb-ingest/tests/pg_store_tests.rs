//! PostgreSQL store tests using SQLx
//!
//! Each test gets a fresh database with the embedded migrations applied.
//! They need a reachable server in `DATABASE_URL`, so they are ignored by
//! default: run with `cargo test -- --ignored`.

use cvedb_common::types::{CveRecord, CvssData, CvssMetric, Reference};
use cvedb_ingest::sink::{RecordSink, StoreSink, UpsertOutcome};
use cvedb_ingest::store::{CveFilter, CveStore, PaginationParams, PgCveStore, StoreError};
use sqlx::PgPool;
use std::sync::Arc;

fn record(id: &str, published: &str, modified: &str, score: f64) -> CveRecord {
    let mut record = CveRecord {
        id: id.to_string(),
        published: Some(published.parse().unwrap()),
        last_modified: Some(modified.parse().unwrap()),
        vuln_status: Some("Analyzed".to_string()),
        references: vec![Reference::new("https://example.com/advisory", Some("cve@mitre.org"))],
        ..Default::default()
    };
    record.metrics.cvss_metric_v31.push(CvssMetric {
        source: Some("nvd@nist.gov".to_string()),
        cvss_data: CvssData {
            version: Some("3.1".to_string()),
            base_score: Some(score),
            ..Default::default()
        },
        ..Default::default()
    });
    record
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_insert_find_and_duplicate(pool: PgPool) -> sqlx::Result<()> {
    let store = PgCveStore::new(pool);
    let cve = record("CVE-2021-44228", "2021-12-10T10:15:00Z", "2024-11-21T00:00:00Z", 10.0);

    store.insert(&cve).await.unwrap();
    assert_eq!(store.find_one("CVE-2021-44228").await.unwrap(), Some(cve.clone()));
    assert_eq!(store.find_one("CVE-0000-0000").await.unwrap(), None);

    let err = store.insert(&cve).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(ref id) if id == "CVE-2021-44228"));
    assert_eq!(store.count().await.unwrap(), 1);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_save_replaces_document(pool: PgPool) -> sqlx::Result<()> {
    let store = PgCveStore::new(pool);
    let mut cve = record("CVE-1999-0334", "1998-09-30T22:30:00Z", "2024-11-20T17:57:50Z", 7.2);
    cve.vuln_status = Some("Modified".to_string());
    cve.references.push(Reference::new("https://example.com/second", None));
    store.insert(&cve).await.unwrap();

    cve.vuln_status = Some("Analyzed".to_string());
    cve.references.truncate(1);
    store.save(&cve).await.unwrap();

    let stored = store.find_one("CVE-1999-0334").await.unwrap().unwrap();
    assert_eq!(stored.vuln_status.as_deref(), Some("Analyzed"));
    assert_eq!(stored.references.len(), 1);

    let missing = record("CVE-2000-0001", "2000-01-01T00:00:00Z", "2000-01-01T00:00:00Z", 1.0);
    assert!(matches!(store.save(&missing).await, Err(StoreError::NotFound(_))));

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_list_filters_and_pages(pool: PgPool) -> sqlx::Result<()> {
    let store = PgCveStore::new(pool);
    let recent = chrono::Utc::now().to_rfc3339();

    for cve in [
        record("CVE-2021-0001", "2021-02-01T00:00:00Z", &recent, 7.5),
        record("CVE-2021-0002", "2021-12-31T23:59:59Z", "2022-01-05T00:00:00Z", 9.8),
        record("CVE-2022-0001", "2022-01-01T00:00:00Z", &recent, 7.5),
    ] {
        store.insert(&cve).await.unwrap();
    }

    let by_year = CveFilter {
        year: Some(2021),
        ..Default::default()
    };
    let page = store.list(&by_year, &PaginationParams::default()).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.data[0].id, "CVE-2021-0001");

    let by_score = CveFilter {
        score: Some(7.5),
        ..Default::default()
    };
    let page = store.list(&by_score, &PaginationParams::default()).await.unwrap();
    assert_eq!(
        page.data.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        vec!["CVE-2021-0001", "CVE-2022-0001"]
    );

    let recently_modified = CveFilter {
        last_modified_days: Some(7),
        ..Default::default()
    };
    let page = store
        .list(&recently_modified, &PaginationParams::default())
        .await
        .unwrap();
    assert_eq!(page.total, 2);

    let page = store
        .list(&CveFilter::default(), &PaginationParams::new(Some(2), Some(2)))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.pages, 2);
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].id, "CVE-2022-0001");

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn test_sink_upserts_through_postgres(pool: PgPool) -> sqlx::Result<()> {
    let store: Arc<dyn CveStore> = Arc::new(PgCveStore::new(pool));
    let sink = StoreSink::new(store.clone());
    let cve = record("CVE-2023-4863", "2023-09-12T15:15:00Z", "2024-01-01T00:00:00Z", 8.8);

    assert_eq!(sink.upsert(cve.clone()).await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(sink.upsert(cve).await.unwrap(), UpsertOutcome::Updated);
    assert_eq!(store.count().await.unwrap(), 1);

    store.close().await;
    assert!(matches!(store.count().await, Err(StoreError::Closed)));

    Ok(())
}
