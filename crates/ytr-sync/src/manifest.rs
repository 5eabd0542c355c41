//! Output table naming and the sidecar load manifests.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use ytr_core::{ReportDescriptor, PRIMARY_KEY};

/// How downloaded artifacts are grouped into output tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TableGrouping {
    /// One table per report category.
    #[default]
    Category,
    /// One table per report category and content date.
    CategoryDate,
}

impl TableGrouping {
    pub fn table_name(self, report: &ReportDescriptor) -> String {
        match self {
            TableGrouping::Category => report.category.to_string(),
            TableGrouping::CategoryDate => format!("{}_{}", report.category, report.report_date()),
        }
    }
}

pub fn table_path(tables_dir: &Path, table: &str) -> PathBuf {
    tables_dir.join(format!("{table}.csv"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableManifest {
    pub destination: String,
    pub incremental: bool,
    pub primary_key: Vec<String>,
}

impl TableManifest {
    pub fn incremental(bucket: &str, table: &str) -> Self {
        Self {
            destination: format!("{bucket}.{table}"),
            incremental: true,
            primary_key: PRIMARY_KEY.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Write `<table>.csv.manifest` next to the table.
pub async fn write_manifest(tables_dir: &Path, bucket: &str, table: &str) -> Result<PathBuf> {
    let path = tables_dir.join(format!("{table}.csv.manifest"));
    let bytes = serde_json::to_vec_pretty(&TableManifest::incremental(bucket, table))
        .context("serializing table manifest")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
