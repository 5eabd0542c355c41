//! Incremental sync pipeline for YouTube Reporting downloads.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use ytr_api::{ReportingApi, TokenSource, YoutubeReportingClient};
use ytr_core::{KeyFieldVocabulary, ReportCategory, ReportDescriptor, SyncState};
use ytr_storage::{
    backup_artifacts, BackupSink, DownloadStore, HttpClientConfig, HttpFetcher, S3BackupSink, StoredArtifact,
    TokenBucketConfig,
};

pub mod config;
pub mod keys;
pub mod manifest;
pub mod resolver;
pub mod selector;
pub mod state;
pub mod transform;

pub use config::{BackupSettings, ConfigError, DataDir, ExtractorConfig, RuntimeSettings};
pub use keys::{classify_and_hash, is_numeric_literal, KeyDeriver};
pub use manifest::{table_path, write_manifest, TableGrouping, TableManifest};
pub use resolver::{resolve_cutoff, resolve_jobs, JobResolution};
pub use selector::{collect_reports, list_job_reports, select_reports};
pub use state::{merge, observed_max, read_state, write_state, STATE_ADVANCE_SECS};
pub use transform::{transform_file, TransformError, TransformOutcome};

pub const CRATE_NAME: &str = "ytr-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// New reports were downloaded and state advanced.
    Completed,
    /// None of the configured report types has a remote job; nothing was written.
    NoMatchingJobs,
    /// Jobs exist but nothing newer than the cutoffs; state was rewritten unchanged.
    NoNewData,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub matched_jobs: usize,
    pub missing_report_types: Vec<ReportCategory>,
    pub downloaded_reports: usize,
    /// Rows appended per output table.
    pub tables: BTreeMap<String, u64>,
    pub backed_up_objects: usize,
    pub state: SyncState,
}

impl SyncRunSummary {
    pub fn rows_written(&self) -> u64 {
        self.tables.values().sum()
    }
}

/// One extractor run over a data directory.
pub struct SyncPipeline {
    data: DataDir,
    config: ExtractorConfig,
    api: Arc<dyn ReportingApi>,
    backup: Option<Arc<dyn BackupSink>>,
    vocabulary: KeyFieldVocabulary,
    run_id: Uuid,
}

impl SyncPipeline {
    pub fn new(data: DataDir, config: ExtractorConfig, api: Arc<dyn ReportingApi>) -> Self {
        Self {
            data,
            config,
            api,
            backup: None,
            vocabulary: KeyFieldVocabulary::default(),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_backup(mut self, sink: Arc<dyn BackupSink>) -> Self {
        self.backup = Some(sink);
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let span = info_span!("sync_run", run_id = %self.run_id);
        self.run_stages().instrument(span).await
    }

    async fn run_stages(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let config = &self.config;
        if config.backup.is_some() && self.backup.is_none() {
            bail!("S3 backup is enabled but no backup sink was provided");
        }

        let prior = read_state(&self.data.input_state()).await?;
        info!(categories = prior.len(), "state loaded");

        let jobs = self
            .api
            .list_jobs(config.include_system_managed)
            .await
            .context("listing reporting jobs")?;
        let resolution = resolve_jobs(
            jobs,
            &config.report_types,
            &prior,
            config.initial_timestamp,
            config.ignore_state_file,
        );
        for category in &resolution.missing {
            warn!(%category, "no reporting job exists for this report type");
        }

        let mut summary = SyncRunSummary {
            run_id: self.run_id,
            started_at,
            finished_at: started_at,
            outcome: RunOutcome::NoMatchingJobs,
            matched_jobs: resolution.jobs.len(),
            missing_report_types: resolution.missing.clone(),
            downloaded_reports: 0,
            tables: BTreeMap::new(),
            backed_up_objects: 0,
            state: prior.clone(),
        };

        if resolution.jobs.is_empty() {
            info!("none of the configured report types has a job; nothing to do");
            summary.finished_at = Utc::now();
            return Ok(summary);
        }

        let listed = collect_reports(self.api.as_ref(), &resolution.jobs, config.page_size).await?;
        let selected = select_reports(listed, config.batch_size);
        info!(jobs = resolution.jobs.len(), reports = selected.len(), "reports selected");

        if selected.is_empty() {
            info!("no new reports since the last run");
            write_state(&self.data.output_state(), &prior).await?;
            summary.outcome = RunOutcome::NoNewData;
            summary.finished_at = Utc::now();
            return Ok(summary);
        }

        let download_dir = tempfile::Builder::new()
            .prefix("ytr-downloads-")
            .tempdir()
            .context("creating download directory")?;
        let store = DownloadStore::new(download_dir.path());
        let artifacts = self.download_reports(&store, &selected).await?;
        summary.downloaded_reports = artifacts.len();

        if config.writes_tables() {
            summary.tables = self.write_tables(&selected, &artifacts).await?;
        }

        let next = merge(&prior, &observed_max(&selected));

        if let (Some(settings), Some(sink)) = (&config.backup, &self.backup) {
            summary.backed_up_objects = backup_artifacts(sink.as_ref(), &settings.remote_path, &artifacts)
                .await
                .with_context(|| format!("backing up downloads to s3://{}", settings.s3.bucket))?;
            info!(objects = summary.backed_up_objects, "downloads backed up");
        }

        write_state(&self.data.output_state(), &next).await?;
        download_dir.close().context("removing download directory")?;

        summary.outcome = RunOutcome::Completed;
        summary.state = next;
        summary.finished_at = Utc::now();
        info!(
            downloaded = summary.downloaded_reports,
            rows = summary.rows_written(),
            "sync complete"
        );
        Ok(summary)
    }

    /// Download with bounded concurrency; results come back in selection order.
    async fn download_reports(
        &self,
        store: &DownloadStore,
        reports: &[ReportDescriptor],
    ) -> Result<Vec<StoredArtifact>> {
        let api = self.api.as_ref();
        stream::iter(reports)
            .map(|report| async move {
                let bytes = api
                    .download_report(report)
                    .await
                    .with_context(|| format!("downloading report {} ({})", report.id, report.category))?;
                store.store_bytes(&report.artifact_file_name(), &bytes).await
            })
            .buffered(self.config.max_concurrent_downloads.max(1))
            .try_collect()
            .await
    }

    /// Append every artifact to its table one at a time, then write the manifests.
    async fn write_tables(
        &self,
        reports: &[ReportDescriptor],
        artifacts: &[StoredArtifact],
    ) -> Result<BTreeMap<String, u64>> {
        let tables_dir = self.data.tables_dir();
        fs::create_dir_all(&tables_dir)
            .await
            .with_context(|| format!("creating {}", tables_dir.display()))?;

        let mut tables: BTreeMap<String, u64> = BTreeMap::new();
        for (report, artifact) in reports.iter().zip(artifacts) {
            if artifact.deduplicated {
                continue;
            }
            let table = self.config.table_grouping.table_name(report);
            let source = artifact.absolute_path.clone();
            let destination = table_path(&tables_dir, &table);
            let deriver = KeyDeriver::for_category(
                &report.category,
                &self.vocabulary,
                &self.config.custom_primary_keys,
            );
            let outcome = tokio::task::spawn_blocking(move || transform_file(&source, &destination, &deriver))
                .await
                .context("transform task failed")?
                .with_context(|| format!("transforming report {} into table {table}", report.id))?;
            *tables.entry(table).or_default() += outcome.rows;
        }

        for table in tables.keys() {
            write_manifest(&tables_dir, &self.config.bucket, table).await?;
        }
        Ok(tables)
    }
}

/// Build the production pipeline from the environment and run it once.
pub async fn run_sync_once(data_dir: Option<PathBuf>) -> Result<SyncRunSummary> {
    let mut settings = RuntimeSettings::from_env();
    if let Some(dir) = data_dir {
        settings = settings.with_data_dir(dir);
    }
    let data = DataDir::new(&settings.data_dir);
    let config = ExtractorConfig::load(data.root())?;
    let run_id = Uuid::new_v4();

    let http = Arc::new(HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(settings.http_timeout_secs),
        user_agent: Some(settings.user_agent.clone()),
        global_concurrency: config.max_concurrent_downloads,
        per_scope_concurrency: config.max_concurrent_downloads,
        token_bucket: settings.requests_per_second.map(TokenBucketConfig::per_second),
        ..Default::default()
    })?);
    let client = YoutubeReportingClient::new(http, TokenSource::new(config.credentials.clone()), run_id)
        .with_base_url(&settings.api_base_url)
        .on_behalf_of(config.content_owner.clone());

    let backup = config
        .backup
        .as_ref()
        .map(|settings| Arc::new(S3BackupSink::new(settings.s3.clone())) as Arc<dyn BackupSink>);
    let mut pipeline = SyncPipeline::new(data, config, Arc::new(client)).with_run_id(run_id);
    if let Some(sink) = backup {
        pipeline = pipeline.with_backup(sink);
    }
    pipeline.run_once().await
}
