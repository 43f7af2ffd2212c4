//! Filter and pagination types for listing stored CVEs
//!
//! ```rust,ignore
//! let filter = CveFilter { year: Some(2021), ..Default::default() };
//! let page = store.list(&filter, &PaginationParams::new(Some(2), Some(50))).await?;
//! println!("{} of {} pages", page.page, page.pages);
//! ```

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use cvedb_common::types::CveRecord;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// Criteria for listing stored records; unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CveFilter {
    /// Exact CVE id
    pub id: Option<String>,
    /// Calendar year (UTC) of `published`
    pub year: Option<i32>,
    /// Any CVSS v2/v3.0/v3.1 base score equal to this value
    pub score: Option<f64>,
    /// Modified within the last N days
    pub last_modified_days: Option<i64>,
}

impl CveFilter {
    /// `[start, end)` bounds of `published` for the year filter. `None` when
    /// no year is set or the year is outside the representable range.
    pub fn published_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let year = self.year?;
        let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
        let end = Utc
            .with_ymd_and_hms(year.checked_add(1)?, 1, 1, 0, 0, 0)
            .single()?;
        Some((start, end))
    }

    /// Earliest `lastModified` accepted by the recency filter.
    ///
    /// Negative day counts behave like 0. A window reaching past the earliest
    /// representable time puts no lower bound on `lastModified`.
    pub fn modified_since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = self.last_modified_days?.max(0);
        Duration::try_days(days).and_then(|window| now.checked_sub_signed(window))
    }

    /// In-process evaluation of the filter, matching the SQL the PostgreSQL
    /// store generates.
    pub fn matches(&self, record: &CveRecord, now: DateTime<Utc>) -> bool {
        if let Some(ref id) = self.id {
            if &record.id != id {
                return false;
            }
        }

        if let Some(year) = self.year {
            if self.published_range().is_none() {
                return false;
            }
            match record.published {
                Some(published) if published.year() == year => {},
                _ => return false,
            }
        }

        if let Some(score) = self.score {
            if !record.base_scores().any(|s| s == score) {
                return false;
            }
        }

        if let Some(since) = self.modified_since(now) {
            match record.last_modified {
                Some(modified) if modified >= since => {},
                _ => return false,
            }
        }

        true
    }
}

/// Page request: 1-based page number and page size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self { page, limit }
    }

    /// Page number, defaulting to 1
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size, defaulting to 20 and clamped to 1-100
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }
}

/// One page of results plus the totals a UI needs to render paging controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub total: i64,
    pub page: i64,
    pub pages: i64,
    pub limit: i64,
    pub data: Vec<T>,
}

impl<T> Paginated<T> {
    pub fn new(params: &PaginationParams, total: i64, data: Vec<T>) -> Self {
        let limit = params.limit();
        Self {
            total,
            page: params.page(),
            pages: (total + limit - 1) / limit,
            limit,
            data,
        }
    }
}
