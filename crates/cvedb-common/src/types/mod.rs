//! Canonical CVE record types
//!
//! These mirror the subset of the NVD CVE 2.0 schema that cvedb keeps locally.
//! Field names serialize in camelCase so a stored document has the same shape
//! as the record the remote API returned.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CveDbError, Result};

/// A vulnerability record as stored locally.
///
/// `id` is the natural key (e.g. `CVE-1999-0334`); it is the only field used
/// to correlate a remote record with a stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CveRecord {
    /// Externally assigned CVE identifier
    pub id: String,

    /// Identifier of the CNA that published the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    /// NVD analysis status ("Analyzed", "Modified", "Awaiting Analysis", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vuln_status: Option<String>,

    #[serde(default)]
    pub cve_tags: Vec<CveTag>,

    #[serde(default)]
    pub descriptions: Vec<LangString>,

    #[serde(default)]
    pub metrics: Metrics,

    #[serde(default)]
    pub weaknesses: Vec<Weakness>,

    #[serde(default)]
    pub configurations: Vec<Configuration>,

    #[serde(default)]
    pub references: Vec<Reference>,
}

impl CveRecord {
    /// Every CVSS base score attached to the record (v2, v3.0, v3.1).
    pub fn base_scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.metrics
            .cvss_metric_v2
            .iter()
            .chain(self.metrics.cvss_metric_v30.iter())
            .chain(self.metrics.cvss_metric_v31.iter())
            .filter_map(|m| m.cvss_data.base_score)
    }

    /// English description, falling back to the first one present.
    pub fn description(&self) -> Option<&str> {
        self.descriptions
            .iter()
            .find(|d| d.lang == "en")
            .or_else(|| self.descriptions.first())
            .map(|d| d.value.as_str())
    }
}

/// Tags a source attached to the record (e.g. "disputed")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CveTag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_identifier: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Text in a given language; used for descriptions and weakness descriptions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LangString {
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub value: String,
}

/// Scored-metric block, one list per CVSS version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cvss_metric_v2: Vec<CvssMetric>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cvss_metric_v30: Vec<CvssMetric>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cvss_metric_v31: Vec<CvssMetric>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cvss_metric_v40: Vec<CvssMetric>,
}

impl Metrics {
    pub fn is_empty(&self) -> bool {
        self.cvss_metric_v2.is_empty()
            && self.cvss_metric_v30.is_empty()
            && self.cvss_metric_v31.is_empty()
            && self.cvss_metric_v40.is_empty()
    }
}

/// One scored metric entry.
///
/// Version-specific flags (v2's `acInsufInfo`, `obtainAllPrivilege`, ...) are
/// kept in `extra` so nothing the source sent inside a metric is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CvssMetric {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,
    #[serde(default)]
    pub cvss_data: CvssData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exploitability_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_score: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CvssData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_severity: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// CWE classification attached by a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Weakness {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub weakness_type: Option<String>,
    #[serde(default)]
    pub description: Vec<LangString>,
}

/// Applicability statement: a tree of CPE match nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Configuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negate: Option<bool>,
    #[serde(default)]
    pub nodes: Vec<ConfigurationNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negate: Option<bool>,
    #[serde(default)]
    pub cpe_match: Vec<CpeMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CpeMatch {
    #[serde(default)]
    pub vulnerable: bool,
    #[serde(default)]
    pub criteria: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_criteria_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_start_including: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_start_excluding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_end_including: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_end_excluding: Option<String>,
}

/// External reference, reduced to where it points and who supplied it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Reference {
    pub fn new(url: impl Into<String>, source: Option<&str>) -> Self {
        Self {
            url: Some(url.into()),
            source: source.map(str::to_string),
        }
    }
}

/// Parse a timestamp as NVD emits it.
///
/// The API returns ISO-8601 without an offset (`2024-11-20T17:57:50.607`),
/// which is UTC. Values carrying an explicit offset are accepted too.
pub fn parse_nvd_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| CveDbError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}
