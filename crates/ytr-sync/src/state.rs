//! `state.json` persistence and the progress reconciliation rule.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;
use ytr_core::{ReportCategory, ReportDescriptor, SyncState};
use ytr_storage::write_atomically;

/// Added to the newest processed `createTime`; `createdAfter` is boundary-inclusive.
pub const STATE_ADVANCE_SECS: i64 = 1;

/// Newest creation time (epoch seconds) per category among `reports`.
pub fn observed_max<'a>(
    reports: impl IntoIterator<Item = &'a ReportDescriptor>,
) -> BTreeMap<ReportCategory, i64> {
    let mut observed: BTreeMap<ReportCategory, i64> = BTreeMap::new();
    for report in reports {
        let ts = report.create_timestamp();
        observed
            .entry(report.category.clone())
            .and_modify(|max| *max = (*max).max(ts))
            .or_insert(ts);
    }
    observed
}

/// Fold this run's observations into the prior state.
///
/// Observed categories move to `observed + 1`, never below their prior value;
/// everything else is copied through.
pub fn merge(prior: &SyncState, observed: &BTreeMap<ReportCategory, i64>) -> SyncState {
    let mut next = prior.clone();
    for (category, max_created) in observed {
        let advanced = max_created + STATE_ADVANCE_SECS;
        let value = prior.get(category).map_or(advanced, |p| p.max(advanced));
        next.insert(category.clone(), value);
    }
    next
}

/// Read the previous run's state. A missing file is an empty state; anything else is fatal.
pub async fn read_state(path: &Path) -> Result<SyncState> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(SyncState::new()),
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

pub async fn write_state(path: &Path, state: &SyncState) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(state).context("serializing state")?;
    write_atomically(path, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn report(category: &str, created: i64) -> ReportDescriptor {
        let ts = Utc.timestamp_opt(created, 0).single().expect("ts");
        ReportDescriptor {
            id: format!("{category}-{created}"),
            job_id: "job".into(),
            category: category.into(),
            create_time: ts,
            start_time: ts,
            end_time: ts,
            download_url: String::new(),
        }
    }

    fn state(pairs: &[(&str, i64)]) -> SyncState {
        pairs.iter().map(|(c, t)| (ReportCategory::from(*c), *t)).collect()
    }

    #[test]
    fn observed_max_picks_newest_per_category() {
        let reports = [report("a", 10), report("a", 30), report("b", 5), report("a", 20)];
        let observed = observed_max(&reports);
        assert_eq!(observed[&ReportCategory::from("a")], 30);
        assert_eq!(observed[&ReportCategory::from("b")], 5);
    }

    #[test]
    fn merge_advances_observed_and_keeps_the_rest() {
        let prior = state(&[("a", 100), ("b", 200)]);
        let observed = observed_max(&[report("a", 150), report("c", 50)]);
        let next = merge(&prior, &observed);
        assert_eq!(next, state(&[("a", 151), ("b", 200), ("c", 51)]));
    }

    #[test]
    fn merge_is_idempotent() {
        let prior = state(&[("a", 100), ("b", 7)]);
        let observed = observed_max(&[report("a", 400)]);
        let once = merge(&prior, &observed);
        let twice = merge(&once, &observed);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_never_moves_backwards() {
        let prior = state(&[("a", 1_000)]);
        let observed = observed_max(&[report("a", 10)]);
        let next = merge(&prior, &observed);
        assert_eq!(next.get(&"a".into()), Some(1_000));
        for (category, value) in prior.iter() {
            assert!(next.get(category).expect("present") >= value);
        }
    }

    #[tokio::test]
    async fn missing_state_file_reads_as_empty() {
        let dir = tempdir().expect("tempdir");
        let state = read_state(&dir.path().join("in").join("state.json"))
            .await
            .expect("read");
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn corrupt_state_file_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(read_state(&path).await.is_err());
    }

    #[tokio::test]
    async fn state_round_trips_through_disk() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out").join("state.json");
        let written = state(&[("channel_basic_a2", 1_672_617_601)]);
        write_state(&path, &written).await.expect("write");
        assert_eq!(read_state(&path).await.expect("read"), written);
    }
}
