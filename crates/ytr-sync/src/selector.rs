//! Report listing, grouping and per-category capping.

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};
use tracing::debug;
use ytr_api::{ApiError, ReportingApi};
use ytr_core::{Job, ReportCategory, ReportDescriptor};

/// Walk every listing page of one job, strictly in sequence.
pub async fn list_job_reports(
    api: &dyn ReportingApi,
    job: &Job,
    page_size: u32,
    created_after: i64,
) -> Result<Vec<ReportDescriptor>, ApiError> {
    let mut reports = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = api
            .list_reports(job, page_size, created_after, page_token.as_deref())
            .await?;
        reports.extend(page.reports);
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }
    debug!(job_id = %job.id, category = %job.category, count = reports.len(), "reports listed");
    Ok(reports)
}

/// All reports of all `jobs`, in job order then listing order.
pub async fn collect_reports(
    api: &dyn ReportingApi,
    jobs: &[Job],
    page_size: u32,
) -> Result<Vec<ReportDescriptor>> {
    let mut all = Vec::new();
    for job in jobs {
        let created_after = job
            .created_after
            .with_context(|| format!("job {} ({}) has no resolved cutoff", job.id, job.category))?;
        let reports = list_job_reports(api, job, page_size, created_after)
            .await
            .with_context(|| format!("listing reports of job {} ({})", job.id, job.category))?;
        all.extend(reports);
    }
    Ok(all)
}

/// Oldest `limit` reports per category, categories in lexical order.
///
/// The sort is stable, so equal creation times keep their listing order. Reports
/// listed twice (same id) are kept once. See [`cap_group`] for how the cap treats
/// reports created within the same second.
pub fn select_reports(reports: Vec<ReportDescriptor>, limit: usize) -> Vec<ReportDescriptor> {
    let mut seen = HashSet::new();
    let mut groups: BTreeMap<ReportCategory, Vec<ReportDescriptor>> = BTreeMap::new();
    for report in reports {
        if seen.insert(report.id.clone()) {
            groups.entry(report.category.clone()).or_default().push(report);
        }
    }

    groups
        .into_values()
        .flat_map(|mut group| {
            group.sort_by_key(|r| r.create_time);
            cap_group(group, limit)
        })
        .collect()
}

/// Cut a sorted group to at most `limit` reports without splitting a second.
///
/// Progress is stored in whole seconds, so reports sharing a second with the
/// first one left out are deferred to the next run. When the whole kept prefix
/// shares that second, the tied reports are all kept instead.
pub fn cap_group(mut group: Vec<ReportDescriptor>, limit: usize) -> Vec<ReportDescriptor> {
    if group.len() <= limit {
        return group;
    }
    let boundary = group[limit].create_timestamp();
    let tie_start = group[..limit]
        .iter()
        .position(|r| r.create_timestamp() == boundary)
        .unwrap_or(limit);
    let keep = if tie_start > 0 {
        tie_start
    } else {
        group
            .iter()
            .position(|r| r.create_timestamp() > boundary)
            .unwrap_or(group.len())
    };
    group.truncate(keep);
    group
}
