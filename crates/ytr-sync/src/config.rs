//! Extractor configuration: the `parameters` object of `config.json` / `config.yaml`,
//! plus runtime knobs taken from the environment.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use ytr_api::{OAuthCredentials, DEFAULT_BASE_URL, DEFAULT_EXPIRY_DATE_MS};
use ytr_core::{
    CustomKeyOverrides, ReportCategory, DEFAULT_BATCH_SIZE, DEFAULT_PAGE_SIZE, DEFAULT_START_TIMESTAMP,
};
use ytr_storage::S3BackupConfig;

use crate::manifest::TableGrouping;

pub const DEFAULT_BUCKET: &str = "in.c-ex-youtube-reporting";
pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration specified: neither config.json nor config.yaml exists in {}", .dir.display())]
    NotFound { dir: PathBuf },
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("the configuration has no `parameters` object")]
    MissingParameters,
    #[error("invalid parameters: {0}. Check out the documentation for more details.")]
    Malformed(#[source] serde_json::Error),
    #[error("missing {0} parameter! Check out the documentation for more details.")]
    MissingCredential(&'static str),
    #[error("missing reportTypes parameter! Please specify the desired reportTypes in an array. Check out the documentation for more details.")]
    MissingReportTypes,
    #[error("invalid reportTypes parameter! The parameter must be an array of report type ids. Check out the documentation for more details.")]
    InvalidReportTypes,
    #[error("array of reportTypes is empty! Please specify which reportTypes you want to download. Check out the documentation for more details.")]
    EmptyReportTypes,
    #[error("invalid customPrimaryKeys parameter: {0}. Use an object mapping a report type to a non-empty array of column names. Check out the documentation for more details.")]
    InvalidCustomPrimaryKeys(String),
    #[error("invalid {parameter} parameter ({value})! Please use a numeric value. Check out the documentation for more details.")]
    InvalidNumber { parameter: &'static str, value: String },
    #[error("invalid {parameter} parameter ({value})! The value must be greater than zero. Check out the documentation for more details.")]
    NonPositive { parameter: &'static str, value: String },
    #[error("missing s3BucketName parameter! It is required when s3Backup or s3OutputOnly is enabled. Check out the documentation for more details.")]
    MissingS3Bucket,
    #[error("missing {0} parameter! It is required when s3Backup or s3OutputOnly is enabled. Check out the documentation for more details.")]
    MissingS3Credential(&'static str),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParameters {
    #[serde(rename = "#accessToken")]
    access_token: Option<String>,
    #[serde(rename = "#refreshToken")]
    refresh_token: Option<String>,
    #[serde(rename = "#clientId")]
    client_id: Option<String>,
    #[serde(rename = "#clientSecret")]
    client_secret: Option<String>,
    #[serde(rename = "#contentOwnerId")]
    content_owner_id: Option<String>,
    expiry_date: Option<Value>,
    report_types: Option<Value>,
    custom_primary_keys: Option<Value>,
    #[serde(default)]
    ignore_state_file: bool,
    initial_timestamp: Option<Value>,
    page_size: Option<Value>,
    batch_size: Option<Value>,
    include_system_managed: Option<bool>,
    bucket: Option<String>,
    #[serde(default)]
    table_grouping: TableGrouping,
    max_concurrent_downloads: Option<Value>,
    #[serde(default)]
    s3_backup: bool,
    #[serde(default)]
    s3_output_only: bool,
    s3_bucket_name: Option<String>,
    s3_region: Option<String>,
    #[serde(rename = "#s3AccessKeyId")]
    s3_access_key_id: Option<String>,
    #[serde(rename = "#s3SecretAccessKey")]
    s3_secret_access_key: Option<String>,
    #[serde(default)]
    remote_path: String,
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub s3: S3BackupConfig,
    pub remote_path: String,
    /// Upload only; no tables or manifests are produced.
    pub output_only: bool,
}

/// Validated extractor parameters.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub credentials: OAuthCredentials,
    pub content_owner: Option<String>,
    pub report_types: Vec<ReportCategory>,
    pub custom_primary_keys: CustomKeyOverrides,
    pub ignore_state_file: bool,
    pub initial_timestamp: i64,
    pub page_size: u32,
    pub batch_size: usize,
    pub include_system_managed: bool,
    pub bucket: String,
    pub table_grouping: TableGrouping,
    pub max_concurrent_downloads: usize,
    pub backup: Option<BackupSettings>,
}

impl ExtractorConfig {
    /// Load `config.json`, falling back to `config.yaml`.
    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let json = data_dir.join("config.json");
        let yaml = data_dir.join("config.yaml");
        let document: Value = if json.is_file() {
            let text = read(&json)?;
            serde_json::from_str(&text).map_err(|err| ConfigError::Parse {
                path: json.clone(),
                message: err.to_string(),
            })?
        } else if yaml.is_file() {
            let text = read(&yaml)?;
            serde_yaml::from_str(&text).map_err(|err| ConfigError::Parse {
                path: yaml.clone(),
                message: err.to_string(),
            })?
        } else {
            return Err(ConfigError::NotFound {
                dir: data_dir.to_path_buf(),
            });
        };
        Self::from_document(document)
    }

    /// Validate a whole configuration document (the object holding `parameters`).
    pub fn from_document(document: Value) -> Result<Self, ConfigError> {
        let parameters = match document {
            Value::Object(mut map) => map.remove("parameters").ok_or(ConfigError::MissingParameters)?,
            _ => return Err(ConfigError::MissingParameters),
        };
        let raw: RawParameters = serde_json::from_value(parameters).map_err(ConfigError::Malformed)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawParameters) -> Result<Self, ConfigError> {
        let credentials = OAuthCredentials {
            access_token: required(raw.access_token, "#accessToken")?,
            client_id: required(raw.client_id, "#clientId")?,
            client_secret: required(raw.client_secret, "#clientSecret")?,
            refresh_token: required(raw.refresh_token, "#refreshToken")?,
            expiry_date_ms: lenient_integer("expiryDate", raw.expiry_date.as_ref())?
                .unwrap_or(DEFAULT_EXPIRY_DATE_MS),
        };

        let report_types = report_types(raw.report_types)?;
        let custom_primary_keys = custom_primary_keys(raw.custom_primary_keys)?;

        let initial_timestamp = lenient_integer("initialTimestamp", raw.initial_timestamp.as_ref())?
            .unwrap_or(DEFAULT_START_TIMESTAMP);
        let page_size = positive("pageSize", raw.page_size.as_ref(), u64::from(DEFAULT_PAGE_SIZE))?;
        let page_size = u32::try_from(page_size).map_err(|_| ConfigError::InvalidNumber {
            parameter: "pageSize",
            value: page_size.to_string(),
        })?;
        let batch_size = positive("batchSize", raw.batch_size.as_ref(), DEFAULT_BATCH_SIZE as u64)? as usize;
        let max_concurrent_downloads = positive(
            "maxConcurrentDownloads",
            raw.max_concurrent_downloads.as_ref(),
            DEFAULT_MAX_CONCURRENT_DOWNLOADS as u64,
        )? as usize;

        let backup = if raw.s3_backup || raw.s3_output_only {
            let bucket = non_blank(raw.s3_bucket_name).ok_or(ConfigError::MissingS3Bucket)?;
            Some(BackupSettings {
                s3: S3BackupConfig {
                    bucket,
                    region: non_blank(raw.s3_region).unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
                    access_key_id: non_blank(raw.s3_access_key_id)
                        .ok_or(ConfigError::MissingS3Credential("#s3AccessKeyId"))?,
                    secret_access_key: non_blank(raw.s3_secret_access_key)
                        .ok_or(ConfigError::MissingS3Credential("#s3SecretAccessKey"))?,
                },
                remote_path: raw.remote_path,
                output_only: raw.s3_output_only,
            })
        } else {
            None
        };

        Ok(Self {
            credentials,
            content_owner: non_blank(raw.content_owner_id),
            report_types,
            custom_primary_keys,
            ignore_state_file: raw.ignore_state_file,
            initial_timestamp,
            page_size,
            batch_size,
            include_system_managed: raw.include_system_managed.unwrap_or(true),
            bucket: non_blank(raw.bucket).unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            table_grouping: raw.table_grouping,
            max_concurrent_downloads,
            backup,
        })
    }

    /// Whether keyed tables and manifests are produced this run.
    pub fn writes_tables(&self) -> bool {
        !self.backup.as_ref().is_some_and(|b| b.output_only)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    non_blank(value).ok_or(ConfigError::MissingCredential(name))
}

fn report_types(value: Option<Value>) -> Result<Vec<ReportCategory>, ConfigError> {
    let items = match value {
        None | Some(Value::Null) => return Err(ConfigError::MissingReportTypes),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(ConfigError::InvalidReportTypes),
    };
    if items.is_empty() {
        return Err(ConfigError::EmptyReportTypes);
    }
    let mut categories: Vec<ReportCategory> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) if !s.trim().is_empty() => {
                let category = ReportCategory::from(s.trim());
                if !categories.contains(&category) {
                    categories.push(category);
                }
            }
            _ => return Err(ConfigError::InvalidReportTypes),
        }
    }
    Ok(categories)
}

fn custom_primary_keys(value: Option<Value>) -> Result<CustomKeyOverrides, ConfigError> {
    let map = match value {
        None | Some(Value::Null) => return Ok(CustomKeyOverrides::default()),
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(ConfigError::InvalidCustomPrimaryKeys(format!(
                "expected an object, got {other}"
            )))
        }
    };
    map.into_iter()
        .map(|(category, fields)| {
            let fields = match fields {
                Value::Array(fields) if !fields.is_empty() => fields,
                _ => {
                    return Err(ConfigError::InvalidCustomPrimaryKeys(format!(
                        "{category} must map to a non-empty array"
                    )))
                }
            };
            let names = fields
                .into_iter()
                .map(|field| match field {
                    Value::String(name) if !name.is_empty() => Ok(name),
                    other => Err(ConfigError::InvalidCustomPrimaryKeys(format!(
                        "{category} lists {other}, which is not a column name"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((ReportCategory::from(category), names))
        })
        .collect()
}

/// Integers given as JSON numbers or numeric strings; fractional parts are dropped.
fn lenient_integer(parameter: &'static str, value: Option<&Value>) -> Result<Option<i64>, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidNumber {
                parameter,
                value: n.to_string(),
            }),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
                .map(Some)
                .ok_or_else(|| ConfigError::InvalidNumber {
                    parameter,
                    value: s.clone(),
                })
        }
        Some(other) => Err(ConfigError::InvalidNumber {
            parameter,
            value: other.to_string(),
        }),
    }
}

fn positive(parameter: &'static str, value: Option<&Value>, default: u64) -> Result<u64, ConfigError> {
    match lenient_integer(parameter, value)? {
        None => Ok(default),
        Some(n) if n > 0 => Ok(n as u64),
        Some(n) => Err(ConfigError::NonPositive {
            parameter,
            value: n.to_string(),
        }),
    }
}

/// Process-level knobs, read from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub requests_per_second: Option<u32>,
    pub api_base_url: String,
}

impl RuntimeSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            data_dir: lookup("YTR_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/data")),
            user_agent: lookup("YTR_USER_AGENT")
                .unwrap_or_else(|| format!("ytr-extractor/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: lookup("YTR_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            requests_per_second: lookup("YTR_REQUESTS_PER_SECOND")
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0),
            api_base_url: lookup("YTR_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

/// Paths inside the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_state(&self) -> PathBuf {
        self.root.join("in").join("state.json")
    }

    pub fn output_state(&self) -> PathBuf {
        self.root.join("out").join("state.json")
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.root.join("out").join("tables")
    }
}
