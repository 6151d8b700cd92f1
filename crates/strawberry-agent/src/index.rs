//! Operation index: builds the actual-state snapshot
//!
//! Keeps only live jobs carrying a managed alias tag. When several live jobs
//! share an alias, the most recently started one wins and the others are
//! reported as duplicates.

use crate::cluster::JobScheduler;
use crate::error::SchedulerResult;
use std::collections::HashMap;
use std::sync::Arc;
use strawberry_types::{ActualEntry, ActualSnapshot, Alias, JobStatus};
use tracing::{debug, warn};

/// Polls the scheduler for alias-tagged jobs
#[derive(Clone)]
pub struct OperationIndex {
    scheduler: Arc<dyn JobScheduler>,
}

impl OperationIndex {
    pub fn new(scheduler: Arc<dyn JobScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn poll(&self) -> SchedulerResult<ActualSnapshot> {
        let jobs = self.scheduler.list_jobs().await?;
        let snapshot = build_snapshot(jobs);

        debug!(
            aliases = snapshot.entries.len(),
            duplicates = snapshot.duplicates.len(),
            "Collected actual state"
        );

        Ok(snapshot)
    }
}

/// Group live managed jobs by alias and pick one winner per alias.
pub fn build_snapshot(jobs: Vec<JobStatus>) -> ActualSnapshot {
    let mut by_alias: HashMap<Alias, Vec<JobStatus>> = HashMap::new();
    for job in jobs.into_iter().filter(|job| job.state.is_live()) {
        if let Some(alias) = job.alias() {
            by_alias.entry(alias).or_default().push(job);
        }
    }

    let mut snapshot = ActualSnapshot::default();
    for (alias, mut jobs) in by_alias {
        // Newest first; job ID breaks ties so every pass picks the same winner
        jobs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let mut jobs = jobs.into_iter();
        let Some(winner) = jobs.next() else {
            continue;
        };

        for loser in jobs {
            warn!(
                alias = %alias,
                job_id = %loser.id,
                kept_job_id = %winner.id,
                "Found duplicate job for alias"
            );
            snapshot.duplicates.push(loser);
        }

        snapshot
            .entries
            .insert(alias.clone(), ActualEntry::from_status(alias, &winner));
    }

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::error::SchedulerError;
    use chrono::{Duration, Utc};
    use strawberry_types::{JobId, JobState, Revision};

    fn job(tag: &str, state: JobState, age_secs: i64) -> JobStatus {
        JobStatus {
            id: JobId::generate(),
            state,
            started_at: Utc::now() - Duration::seconds(age_secs),
            alias_tag: Some(tag.to_string()),
            revision: Some(Revision::new(1)),
        }
    }

    #[test]
    fn test_only_live_managed_jobs_are_indexed() {
        let snapshot = build_snapshot(vec![
            job("*live", JobState::Running, 10),
            job("*starting", JobState::Starting, 10),
            job("*done", JobState::Completed, 10),
            job("*crashed", JobState::Failed, 10),
            job("foreign", JobState::Running, 10),
        ]);

        let mut aliases: Vec<&str> = snapshot.entries.keys().map(Alias::as_str).collect();
        aliases.sort_unstable();
        assert_eq!(aliases, vec!["live", "starting"]);
        assert!(snapshot.duplicates.is_empty());
    }

    #[test]
    fn test_newest_duplicate_wins() {
        let old = job("*test", JobState::Running, 60);
        let older = job("*test", JobState::Running, 120);
        let newest = job("*test", JobState::Starting, 5);

        let snapshot = build_snapshot(vec![old.clone(), newest.clone(), older.clone()]);

        let entry = snapshot.get(&Alias::new("test")).unwrap();
        assert_eq!(entry.job_id, newest.id);
        assert_eq!(entry.state, JobState::Starting);

        let mut losers: Vec<JobId> = snapshot.duplicates.iter().map(|j| j.id.clone()).collect();
        losers.sort();
        let mut expected = vec![old.id, older.id];
        expected.sort();
        assert_eq!(losers, expected);
    }

    #[test]
    fn test_ties_are_broken_deterministically() {
        let started_at = Utc::now();
        let mut a = job("*test", JobState::Running, 0);
        let mut b = job("*test", JobState::Running, 0);
        a.started_at = started_at;
        b.started_at = started_at;

        let first = build_snapshot(vec![a.clone(), b.clone()]);
        let second = build_snapshot(vec![b, a]);
        assert_eq!(
            first.get(&Alias::new("test")).unwrap().job_id,
            second.get(&Alias::new("test")).unwrap().job_id
        );
    }

    #[tokio::test]
    async fn test_poll_propagates_scheduler_errors() {
        let cluster = InMemoryCluster::new();
        cluster.fail_next_lists(1);
        let index = OperationIndex::new(Arc::new(cluster));

        assert!(matches!(index.poll().await, Err(SchedulerError::Transient(_))));
        assert!(index.poll().await.unwrap().entries.is_empty());
    }
}
