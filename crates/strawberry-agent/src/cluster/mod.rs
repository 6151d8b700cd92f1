//! Cluster scheduler boundary
//!
//! The agent lists, starts and aborts jobs through [`JobScheduler`]. The alias
//! tag attached at start time is the only key used to match jobs to aliases.

mod memory;

pub use memory::InMemoryCluster;

use crate::error::SchedulerResult;
use async_trait::async_trait;
use strawberry_types::{JobId, JobStartRequest, JobStatus, Revision};

/// Job scheduler operations needed by the agent
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// All jobs known to the scheduler, with their alias and revision tags
    async fn list_jobs(&self) -> SchedulerResult<Vec<JobStatus>>;

    /// Start a job tagged with `alias_tag` and `revision`
    async fn start_job(
        &self,
        request: JobStartRequest,
        alias_tag: &str,
        revision: Revision,
    ) -> SchedulerResult<JobId>;

    /// Abort a job by ID
    async fn abort_job(&self, id: &JobId) -> SchedulerResult<()>;
}
