//! YouTube Reporting API client contract and HTTP implementation.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use ytr_core::{Job, ReportCategory, ReportDescriptor};
use ytr_storage::{FetchError, FetchRequest, HttpFetcher};

pub mod oauth;

pub use oauth::{OAuthCredentials, TokenSource, DEFAULT_EXPIRY_DATE_MS, GOOGLE_TOKEN_URL};

pub const CRATE_NAME: &str = "ytr-api";
pub const DEFAULT_BASE_URL: &str = "https://youtubereporting.googleapis.com";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("refreshing access token: {0}")]
    TokenRefresh(String),
    #[error("invalid cutoff timestamp {0}")]
    InvalidTimestamp(i64),
}

/// One page of a job's report listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportPage {
    pub reports: Vec<ReportDescriptor>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait ReportingApi: Send + Sync {
    /// All jobs visible to the content owner, across every listing page.
    async fn list_jobs(&self, include_system_managed: bool) -> Result<Vec<Job>, ApiError>;

    /// One page of reports for `job` created after `created_after` (epoch seconds).
    async fn list_reports(
        &self,
        job: &Job,
        page_size: u32,
        created_after: i64,
        page_token: Option<&str>,
    ) -> Result<ReportPage, ApiError>;

    async fn download_report(&self, report: &ReportDescriptor) -> Result<Vec<u8>, ApiError>;
}

/// `createdAfter` rendering: RFC 3339 UTC with microseconds.
pub fn format_created_after(epoch_seconds: i64) -> Result<String, ApiError> {
    Utc.timestamp_opt(epoch_seconds, 0)
        .single()
        .map(|ts: DateTime<Utc>| ts.to_rfc3339_opts(SecondsFormat::Micros, true))
        .ok_or(ApiError::InvalidTimestamp(epoch_seconds))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobsResponse {
    #[serde(default)]
    jobs: Option<Vec<WireJob>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireJob {
    id: String,
    report_type_id: String,
    name: Option<String>,
    #[serde(default)]
    system_managed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportsResponse {
    #[serde(default)]
    reports: Option<Vec<WireReport>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReport {
    id: String,
    job_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    create_time: DateTime<Utc>,
    download_url: String,
}

impl From<WireJob> for Job {
    fn from(wire: WireJob) -> Self {
        Job {
            id: wire.id,
            category: ReportCategory::new(wire.report_type_id),
            name: wire.name,
            system_managed: wire.system_managed,
            created_after: None,
        }
    }
}

impl WireReport {
    fn into_descriptor(self, category: &ReportCategory) -> ReportDescriptor {
        ReportDescriptor {
            id: self.id,
            job_id: self.job_id,
            category: category.clone(),
            create_time: self.create_time,
            start_time: self.start_time,
            end_time: self.end_time,
            download_url: self.download_url,
        }
    }
}

fn decode<T: DeserializeOwned>(what: &'static str, body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|source| ApiError::Decode { what, source })
}

fn into_page(response: ReportsResponse, job: &Job) -> ReportPage {
    ReportPage {
        reports: response
            .reports
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.into_descriptor(&job.category))
            .collect(),
        next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
    }
}

/// Fetch pages until the listing returns no token or an empty one.
async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>, ApiError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<String>), ApiError>>,
{
    let mut items = Vec::new();
    let mut page_token = None;
    loop {
        let (page, next) = fetch_page(page_token.take()).await?;
        items.extend(page);
        match next.filter(|t| !t.is_empty()) {
            Some(token) => page_token = Some(token),
            None => return Ok(items),
        }
    }
}

/// HTTP client for `youtubereporting.googleapis.com/v1`.
pub struct YoutubeReportingClient {
    http: Arc<HttpFetcher>,
    tokens: TokenSource,
    base_url: String,
    content_owner: Option<String>,
    run_id: Uuid,
}

impl YoutubeReportingClient {
    pub fn new(http: Arc<HttpFetcher>, tokens: TokenSource, run_id: Uuid) -> Self {
        Self {
            http,
            tokens,
            base_url: DEFAULT_BASE_URL.to_string(),
            content_owner: None,
            run_id,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn on_behalf_of(mut self, content_owner: Option<String>) -> Self {
        self.content_owner = content_owner;
        self
    }

    async fn authorized(&self, url: String) -> Result<FetchRequest, ApiError> {
        let token = self.tokens.access_token(&self.http, self.run_id).await?;
        Ok(FetchRequest::get(url)
            .bearer(token)
            .query_opt("onBehalfOfContentOwner", self.content_owner.as_deref()))
    }
}

#[async_trait]
impl ReportingApi for YoutubeReportingClient {
    async fn list_jobs(&self, include_system_managed: bool) -> Result<Vec<Job>, ApiError> {
        let jobs = collect_pages(|page_token| async move {
            let request = self
                .authorized(format!("{}/v1/jobs", self.base_url))
                .await?
                .query("includeSystemManaged", include_system_managed)
                .query_opt("pageToken", page_token.as_deref());
            let response = self.http.fetch_bytes(self.run_id, "listing", &request).await?;
            let page: JobsResponse = decode("job listing", &response.body)?;
            let jobs = page.jobs.unwrap_or_default().into_iter().map(Job::from).collect();
            Ok((jobs, page.next_page_token))
        })
        .await?;
        debug!(count = jobs.len(), "jobs listed");
        Ok(jobs)
    }

    async fn list_reports(
        &self,
        job: &Job,
        page_size: u32,
        created_after: i64,
        page_token: Option<&str>,
    ) -> Result<ReportPage, ApiError> {
        let request = self
            .authorized(format!("{}/v1/jobs/{}/reports", self.base_url, job.id))
            .await?
            .query("pageSize", page_size)
            .query("createdAfter", format_created_after(created_after)?)
            .query_opt("pageToken", page_token);
        let response = self.http.fetch_bytes(self.run_id, "listing", &request).await?;
        let page: ReportsResponse = decode("report listing", &response.body)?;
        Ok(into_page(page, job))
    }

    async fn download_report(&self, report: &ReportDescriptor) -> Result<Vec<u8>, ApiError> {
        let request = self.authorized(report.download_url.clone()).await?;
        let response = self
            .http
            .fetch_bytes(self.run_id, report.category.as_str(), &request)
            .await?;
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job {
            id: "job-1".into(),
            category: "channel_basic_a2".into(),
            name: None,
            system_managed: false,
            created_after: Some(0),
        }
    }

    #[test]
    fn created_after_uses_microsecond_rfc3339() {
        assert_eq!(
            format_created_after(1_438_430_400).expect("ts"),
            "2015-08-01T12:00:00.000000Z"
        );
    }

    #[test]
    fn report_page_inherits_job_category() {
        let body = br#"{
            "reports": [{
                "id": "r-1",
                "jobId": "job-1",
                "startTime": "2023-01-01T08:00:00Z",
                "endTime": "2023-01-02T08:00:00Z",
                "createTime": "2023-01-03T10:20:30.123456Z",
                "downloadUrl": "https://youtubereporting.googleapis.com/v1/media/CONTENT_OWNER/x?alt=media"
            }],
            "nextPageToken": "p2"
        }"#;
        let page = into_page(decode("report listing", body).expect("decode"), &job());
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
        assert_eq!(page.reports.len(), 1);
        assert_eq!(page.reports[0].category.as_str(), "channel_basic_a2");
        assert_eq!(page.reports[0].report_date(), "20230101");
        assert_eq!(page.reports[0].create_timestamp(), 1_672_741_230);
    }

    #[test]
    fn empty_report_page_is_valid() {
        let page = into_page(decode("report listing", b"{}").expect("decode"), &job());
        assert!(page.reports.is_empty());
        assert!(page.next_page_token.is_none());

        let page = into_page(
            decode("report listing", br#"{"reports": [], "nextPageToken": ""}"#).expect("decode"),
            &job(),
        );
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn jobs_decode_with_report_type_as_category() {
        let body = br#"{"jobs": [{"id": "j", "reportTypeId": "content_owner_basic_a3", "name": "n", "systemManaged": true}]}"#;
        let page: JobsResponse = decode("job listing", body).expect("decode");
        let jobs: Vec<Job> = page.jobs.unwrap_or_default().into_iter().map(Job::from).collect();
        assert_eq!(jobs[0].category.as_str(), "content_owner_basic_a3");
        assert!(jobs[0].system_managed);
        assert!(jobs[0].created_after.is_none());
    }

    #[tokio::test]
    async fn job_pages_stop_at_an_empty_token() {
        let mut pages = vec![
            (vec![1, 2], Some("p2".to_string())),
            (Vec::new(), Some("p3".to_string())),
            (vec![3], Some(String::new())),
            (vec![99], None),
        ]
        .into_iter();
        let mut tokens_seen = Vec::new();

        let items = collect_pages(|token| {
            tokens_seen.push(token);
            let page = pages.next().expect("page requested past the end");
            async move { Ok(page) }
        })
        .await
        .expect("pages");

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(
            tokens_seen,
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
    }

    #[tokio::test]
    async fn job_page_failure_stops_the_listing() {
        let mut calls = 0;
        let err = collect_pages::<u8, _, _>(|_| {
            calls += 1;
            async { Err(ApiError::TokenRefresh("denied".into())) }
        })
        .await
        .expect_err("failure");
        assert!(matches!(err, ApiError::TokenRefresh(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn malformed_listing_is_a_decode_error() {
        let err = decode::<ReportsResponse>("report listing", b"not json").expect_err("error");
        assert!(matches!(err, ApiError::Decode { what: "report listing", .. }));
    }
}
