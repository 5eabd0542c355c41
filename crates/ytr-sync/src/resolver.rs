//! Per-category fetch cutoffs.

use ytr_core::{Job, ReportCategory, SyncState};

/// Earliest creation time to request for `category`.
///
/// Never earlier than `configured_default`, never before already synchronized progress.
pub fn resolve_cutoff(
    category: &ReportCategory,
    state: &SyncState,
    configured_default: i64,
    ignore_state: bool,
) -> i64 {
    if ignore_state {
        return configured_default;
    }
    state
        .get(category)
        .map_or(configured_default, |stored| configured_default.max(stored))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResolution {
    /// Requested jobs, each carrying its resolved cutoff.
    pub jobs: Vec<Job>,
    /// Requested categories with no remote job.
    pub missing: Vec<ReportCategory>,
}

/// Keep the jobs for `requested` categories and attach their cutoffs.
pub fn resolve_jobs(
    jobs: Vec<Job>,
    requested: &[ReportCategory],
    state: &SyncState,
    configured_default: i64,
    ignore_state: bool,
) -> JobResolution {
    let jobs: Vec<Job> = jobs
        .into_iter()
        .filter(|job| requested.contains(&job.category))
        .map(|job| {
            let cutoff = resolve_cutoff(&job.category, state, configured_default, ignore_state);
            job.with_created_after(cutoff)
        })
        .collect();
    let missing = requested
        .iter()
        .filter(|category| !jobs.iter().any(|job| &job.category == *category))
        .cloned()
        .collect();
    JobResolution { jobs, missing }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: i64 = 1_438_430_400;

    fn state(pairs: &[(&str, i64)]) -> SyncState {
        pairs.iter().map(|(c, t)| (ReportCategory::from(*c), *t)).collect()
    }

    fn job(id: &str, category: &str) -> Job {
        Job {
            id: id.into(),
            category: category.into(),
            name: None,
            system_managed: false,
            created_after: None,
        }
    }

    #[test]
    fn default_applies_without_state_entry() {
        let cutoff = resolve_cutoff(&"basic_a2".into(), &state(&[("other", 2_000_000_000)]), DEFAULT, false);
        assert_eq!(cutoff, DEFAULT);
    }

    #[test]
    fn configured_floor_wins_over_older_state() {
        let cutoff = resolve_cutoff(&"basic_a2".into(), &state(&[("basic_a2", 1000)]), DEFAULT, false);
        assert_eq!(cutoff, DEFAULT);
    }

    #[test]
    fn newer_state_wins_over_floor() {
        let s = state(&[("basic_a2", 1_700_000_000)]);
        assert_eq!(resolve_cutoff(&"basic_a2".into(), &s, DEFAULT, false), 1_700_000_000);
    }

    #[test]
    fn ignoring_state_always_returns_default() {
        let s = state(&[("basic_a2", 1_700_000_000)]);
        assert_eq!(resolve_cutoff(&"basic_a2".into(), &s, DEFAULT, true), DEFAULT);
    }

    #[test]
    fn jobs_are_filtered_and_stamped() {
        let requested = vec![ReportCategory::from("a"), ReportCategory::from("missing")];
        let resolution = resolve_jobs(
            vec![job("1", "a"), job("2", "b")],
            &requested,
            &state(&[("a", 1_700_000_000)]),
            DEFAULT,
            false,
        );
        assert_eq!(resolution.jobs.len(), 1);
        assert_eq!(resolution.jobs[0].id, "1");
        assert_eq!(resolution.jobs[0].created_after, Some(1_700_000_000));
        assert_eq!(resolution.missing, vec![ReportCategory::from("missing")]);
    }
}
