//! Job types exchanged with the cluster scheduler
//!
//! A job is the scheduler-level operation backing an alias. The agent only
//! ever sees jobs through their listing entry ([`JobStatus`]) and starts them
//! from a controller-built [`JobStartRequest`].

use crate::{Alias, Family, JobId, Revision};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Job lifecycle state as reported by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted by the scheduler, not yet running
    Starting,
    /// Running normally
    Running,
    /// Finished on its own
    Completed,
    /// Crashed or was failed by the scheduler
    Failed,
    /// Aborted on request
    Aborted,
}

impl JobState {
    /// Whether the job still occupies its alias slot.
    pub fn is_live(&self) -> bool {
        matches!(self, JobState::Starting | JobState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Starting => "starting",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Request to start a job, produced by a family controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStartRequest {
    /// Family that built the request
    pub family: Family,

    /// Human-readable title
    pub title: String,

    /// Family-specific job specification, opaque to the agent
    pub spec: serde_json::Value,

    /// Scheduler pool to run in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,

    /// Free-form annotations attached to the job
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, serde_json::Value>,
}

impl JobStartRequest {
    pub fn new(family: Family, spec: serde_json::Value) -> Self {
        Self {
            title: family.to_string(),
            family,
            spec,
            pool: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }
}

/// A job as seen in the scheduler's listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Scheduler job ID
    pub id: JobId,

    /// Reported lifecycle state
    pub state: JobState,

    /// Start timestamp
    pub started_at: chrono::DateTime<chrono::Utc>,

    /// Alias tag attached at start time (`*<alias>`), if any
    pub alias_tag: Option<String>,

    /// Speclet revision attached at start time, if any
    pub revision: Option<Revision>,
}

impl JobStatus {
    /// Alias this job belongs to, if it carries a managed tag.
    pub fn alias(&self) -> Option<Alias> {
        self.alias_tag.as_deref().and_then(Alias::from_tag)
    }
}
