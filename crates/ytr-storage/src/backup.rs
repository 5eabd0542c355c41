//! Long-term backup of raw downloaded reports to S3.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::StoredArtifact;

/// Prefix for the overwritable "latest per category and date" copies.
pub const LATEST_PREFIX: &str = "youtube_reporting_data";
/// Prefix for the permanent per-creation-time history copies.
pub const HISTORY_PREFIX: &str = "youtube_reporting_data_by_create_times";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("unexpected download file name {0:?}, expected <category>|<date>|<create time>.csv")]
    FileName(String),
    #[error("reading {path} for upload: {message}")]
    Read { path: String, message: String },
    #[error("uploading s3://{bucket}/{key}: {message}")]
    Upload {
        bucket: String,
        key: String,
        message: String,
    },
}

#[async_trait]
pub trait BackupSink: Send + Sync {
    async fn upload_file(&self, key: &str, path: &Path) -> Result<(), BackupError>;
}

#[derive(Debug, Clone)]
pub struct S3BackupConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Clone)]
pub struct S3BackupSink {
    client: Client,
    bucket: String,
}

impl S3BackupSink {
    pub fn new(config: S3BackupConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "ytr-backup",
        );
        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .build();

        info!(bucket = %config.bucket, region = %config.region, "s3 backup client initialized");

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
        }
    }
}

#[async_trait]
impl BackupSink for S3BackupSink {
    #[instrument(skip(self, path), fields(bucket = %self.bucket))]
    async fn upload_file(&self, key: &str, path: &Path) -> Result<(), BackupError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|err| BackupError::Read {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("text/csv")
            .body(body)
            .send()
            .await
            .map_err(|err| BackupError::Upload {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                message: err.to_string(),
            })?;

        debug!(key, "uploaded");
        Ok(())
    }
}

fn split_file_name(file_name: &str) -> Result<(&str, &str, &str), BackupError> {
    let stem = file_name
        .strip_suffix(".csv")
        .ok_or_else(|| BackupError::FileName(file_name.to_string()))?;
    let mut parts = stem.split('|');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(category), Some(date), Some(created), None) => Ok((category, date, created)),
        _ => Err(BackupError::FileName(file_name.to_string())),
    }
}

fn join_key(remote_path: &str, prefix: &str, name: &str) -> String {
    let remote_path = remote_path.trim_matches('/');
    if remote_path.is_empty() {
        format!("{prefix}/{name}")
    } else {
        format!("{remote_path}/{prefix}/{name}")
    }
}

/// `<remote>/youtube_reporting_data/<category>|<date>.csv`, overwritten by newer generations.
pub fn latest_backup_key(remote_path: &str, file_name: &str) -> Result<String, BackupError> {
    let (category, date, _) = split_file_name(file_name)?;
    Ok(join_key(remote_path, LATEST_PREFIX, &format!("{category}|{date}.csv")))
}

/// `<remote>/youtube_reporting_data_by_create_times/<category>|<date>|<create>.csv`.
pub fn history_backup_key(remote_path: &str, file_name: &str) -> Result<String, BackupError> {
    let (category, date, created) = split_file_name(file_name)?;
    Ok(join_key(
        remote_path,
        HISTORY_PREFIX,
        &format!("{category}|{date}|{created}.csv"),
    ))
}

/// Upload every artifact unmodified under both naming schemes. Returns the object count.
pub async fn backup_artifacts(
    sink: &dyn BackupSink,
    remote_path: &str,
    artifacts: &[StoredArtifact],
) -> Result<usize, BackupError> {
    let mut uploaded = 0usize;
    for artifact in artifacts {
        let latest = latest_backup_key(remote_path, &artifact.file_name)?;
        let history = history_backup_key(remote_path, &artifact.file_name)?;
        sink.upload_file(&latest, &artifact.absolute_path).await?;
        sink.upload_file(&history, &artifact.absolute_path).await?;
        uploaded += 2;
    }
    Ok(uploaded)
}
