//! In-memory job scheduler implementation

use super::JobScheduler;
use crate::error::{SchedulerError, SchedulerResult};
use crate::fault::FaultInjector;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use strawberry_types::{Alias, JobId, JobStartRequest, JobState, JobStatus, Revision};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MemoryJob {
    status: JobStatus,
    request: Option<JobStartRequest>,
}

/// In-memory scheduler for development and testing
///
/// Jobs never finish on their own; they stay in their initial state until
/// aborted or moved with [`InMemoryCluster::set_job_state`]. Terminated jobs
/// are kept and still listed.
#[derive(Debug, Clone)]
pub struct InMemoryCluster {
    jobs: Arc<RwLock<HashMap<JobId, MemoryJob>>>,
    initial_state: JobState,
    failing_lists: FaultInjector,
    failing_starts: FaultInjector,
    rejecting_starts: FaultInjector,
    failing_aborts: FaultInjector,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Create a scheduler whose jobs start directly in the running state
    pub fn new() -> Self {
        Self::with_initial_state(JobState::Running)
    }

    /// Create a scheduler whose new jobs are reported in `state`
    pub fn with_initial_state(state: JobState) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            initial_state: state,
            failing_lists: FaultInjector::default(),
            failing_starts: FaultInjector::default(),
            rejecting_starts: FaultInjector::default(),
            failing_aborts: FaultInjector::default(),
        }
    }

    /// Every job ever seen, in no particular order
    pub async fn jobs(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.read().await;
        jobs.values().map(|job| job.status.clone()).collect()
    }

    /// Live jobs tagged with `alias`
    pub async fn live_jobs_for(&self, alias: &Alias) -> Vec<JobStatus> {
        let jobs = self.jobs.read().await;
        jobs.values()
            .filter(|job| job.status.state.is_live() && job.status.alias().as_ref() == Some(alias))
            .map(|job| job.status.clone())
            .collect()
    }

    /// Sorted aliases of all live managed jobs, one entry per job
    pub async fn running_aliases(&self) -> Vec<String> {
        let jobs = self.jobs.read().await;
        let mut aliases: Vec<String> = jobs
            .values()
            .filter(|job| job.status.state.is_live())
            .filter_map(|job| job.status.alias())
            .map(|alias| alias.as_str().to_string())
            .collect();
        aliases.sort();
        aliases
    }

    /// Request a job was started from
    pub async fn request(&self, id: &JobId) -> Option<JobStartRequest> {
        let jobs = self.jobs.read().await;
        jobs.get(id).and_then(|job| job.request.clone())
    }

    /// Put a job into the listing as if someone else had started it
    pub async fn insert_job(&self, status: JobStatus) {
        let mut jobs = self.jobs.write().await;
        jobs.insert(
            status.id.clone(),
            MemoryJob {
                status,
                request: None,
            },
        );
    }

    /// Move a job to another state, e.g. to simulate a crash
    pub async fn set_job_state(&self, id: &JobId, state: JobState) -> SchedulerResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.clone()))?;
        job.status.state = state;
        Ok(())
    }

    /// Make the next `count` listings fail with a transient error
    pub fn fail_next_lists(&self, count: u32) {
        self.failing_lists.arm(count);
    }

    /// Make the next `count` starts fail with a transient error
    pub fn fail_next_starts(&self, count: u32) {
        self.failing_starts.arm(count);
    }

    /// Make the next `count` starts be rejected for good
    pub fn reject_next_starts(&self, count: u32) {
        self.rejecting_starts.arm(count);
    }

    /// Make the next `count` aborts fail with a transient error
    pub fn fail_next_aborts(&self, count: u32) {
        self.failing_aborts.arm(count);
    }
}

#[async_trait]
impl JobScheduler for InMemoryCluster {
    async fn list_jobs(&self) -> SchedulerResult<Vec<JobStatus>> {
        if self.failing_lists.trip() {
            return Err(SchedulerError::Transient(
                "injected list failure".to_string(),
            ));
        }
        Ok(self.jobs().await)
    }

    async fn start_job(
        &self,
        request: JobStartRequest,
        alias_tag: &str,
        revision: Revision,
    ) -> SchedulerResult<JobId> {
        if self.failing_starts.trip() {
            return Err(SchedulerError::Transient(format!(
                "injected start failure for {}",
                alias_tag
            )));
        }
        if self.rejecting_starts.trip() {
            return Err(SchedulerError::Rejected(format!(
                "injected start rejection for {}",
                alias_tag
            )));
        }

        let status = JobStatus {
            id: JobId::generate(),
            state: self.initial_state,
            started_at: chrono::Utc::now(),
            alias_tag: Some(alias_tag.to_string()),
            revision: Some(revision),
        };
        let id = status.id.clone();

        tracing::debug!(job_id = %id, alias_tag, %revision, "Started in-memory job");

        let mut jobs = self.jobs.write().await;
        jobs.insert(
            id.clone(),
            MemoryJob {
                status,
                request: Some(request),
            },
        );
        Ok(id)
    }

    async fn abort_job(&self, id: &JobId) -> SchedulerResult<()> {
        if self.failing_aborts.trip() {
            return Err(SchedulerError::Transient(format!(
                "injected abort failure for {}",
                id
            )));
        }

        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.clone()))?;

        if job.status.state.is_live() {
            job.status.state = JobState::Aborted;
        }
        Ok(())
    }
}
