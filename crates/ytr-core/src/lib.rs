//! Core domain model for the YouTube Reporting extractor.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const CRATE_NAME: &str = "ytr-core";

/// Default `createdAfter` floor (2015-08-01T12:00:00Z) when neither config nor state provide one.
pub const DEFAULT_START_TIMESTAMP: i64 = 1_438_430_400;
pub const DEFAULT_PAGE_SIZE: u32 = 300;
pub const DEFAULT_BATCH_SIZE: usize = 25;

/// Name of the synthetic identifier column prepended to every output row.
pub const ID_COLUMN: &str = "id";
pub const PRIMARY_KEY: [&str; 1] = [ID_COLUMN];

/// Reserved content-date field, always treated as a key field.
pub const DATE_FIELD: &str = "date";
pub const KEY_SUFFIXES: [&str; 6] = ["date", "id", "status", "type", "code", "detail"];

/// Logical report kind (`reportTypeId`), the partition key for state and tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportCategory(String);

impl ReportCategory {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReportCategory {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ReportCategory {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Remote recurring report definition scoped to one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub category: ReportCategory,
    pub name: Option<String>,
    pub system_managed: bool,
    /// Resolved fetch cutoff in epoch seconds. `None` until the resolver ran.
    pub created_after: Option<i64>,
}

impl Job {
    pub fn with_created_after(mut self, cutoff: i64) -> Self {
        self.created_after = Some(cutoff);
        self
    }
}

/// One downloadable report artifact produced by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDescriptor {
    pub id: String,
    pub job_id: String,
    pub category: ReportCategory,
    /// When the artifact itself was generated; drives ordering and state.
    pub create_time: DateTime<Utc>,
    /// Start of the period the report content covers.
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub download_url: String,
}

impl ReportDescriptor {
    pub fn create_timestamp(&self) -> i64 {
        self.create_time.timestamp()
    }

    /// Content date as `YYYYMMDD`.
    pub fn report_date(&self) -> String {
        self.start_time.format("%Y%m%d").to_string()
    }

    /// File name used for the raw download: `<category>|<date>|<create epoch>.csv`.
    pub fn artifact_file_name(&self) -> String {
        format!(
            "{}|{}|{}.csv",
            self.category,
            self.report_date(),
            self.create_timestamp()
        )
    }
}

/// Persisted per-category progress: newest processed `createTime` (epoch seconds, +1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SyncState(BTreeMap<ReportCategory, i64>);

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: &ReportCategory) -> Option<i64> {
        self.0.get(category).copied()
    }

    pub fn insert(&mut self, category: ReportCategory, timestamp: i64) -> Option<i64> {
        self.0.insert(category, timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReportCategory, i64)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ReportCategory, i64)> for SyncState {
    fn from_iter<I: IntoIterator<Item = (ReportCategory, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredTimestamp {
    Single(i64),
    History(Vec<i64>),
}

impl<'de> Deserialize<'de> for SyncState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<ReportCategory, StoredTimestamp>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .filter_map(|(category, stored)| match stored {
                StoredTimestamp::Single(ts) => Some((category, ts)),
                // older state documents kept every downloaded timestamp
                StoredTimestamp::History(all) => all.into_iter().max().map(|ts| (category, ts)),
            })
            .collect())
    }
}

/// Explicit per-category key field lists that bypass the classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomKeyOverrides(BTreeMap<ReportCategory, Vec<String>>);

impl CustomKeyOverrides {
    pub fn get(&self, category: &ReportCategory) -> Option<&[String]> {
        self.0.get(category).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReportCategory, &Vec<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ReportCategory, Vec<String>)> for CustomKeyOverrides {
    fn from_iter<I: IntoIterator<Item = (ReportCategory, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Classifier constants: the reserved date field and dimension-like name suffixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFieldVocabulary {
    pub date_field: String,
    pub suffixes: Vec<String>,
}

impl Default for KeyFieldVocabulary {
    fn default() -> Self {
        Self {
            date_field: DATE_FIELD.to_string(),
            suffixes: KEY_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl KeyFieldVocabulary {
    pub fn has_suffix(&self, segment: &str) -> bool {
        self.suffixes.iter().any(|s| s == segment)
    }
}

/// A keyed output record: `id` first, then the source columns in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    columns: Vec<(String, String)>,
}

impl OutputRow {
    pub fn new<'a>(id: String, fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut columns = vec![(ID_COLUMN.to_string(), id)];
        columns.extend(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
        Self { columns }
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(_, v)| v.as_str())
    }
}
