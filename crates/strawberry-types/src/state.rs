//! Per-alias lifecycle state
//!
//! `AliasState` is the agent's in-memory record of an alias. It is created
//! the first time the alias shows up in either snapshot and dropped once the
//! alias is gone from both.

use crate::{AbortReason, Alias, Family, JobId, JobState, Revision};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of an alias
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasPhase {
    /// No job, nothing requested yet
    #[default]
    Absent,
    /// Start issued, waiting for the job to show up running
    Starting,
    /// Job is running with an up-to-date speclet
    Running,
    /// Abort issued for a restart, waiting for the old job to terminate
    Restarting,
    /// Abort issued because the node went away (or changed family)
    Stopping,
    /// Parked until the speclet changes again
    Failed,
}

impl fmt::Display for AliasPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AliasPhase::Absent => "absent",
            AliasPhase::Starting => "starting",
            AliasPhase::Running => "running",
            AliasPhase::Restarting => "restarting",
            AliasPhase::Stopping => "stopping",
            AliasPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Status record written back to the alias node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub phase: AliasPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_state: Option<JobState>,

    /// Last revision a running job was confirmed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciled_revision: Option<Revision>,

    pub incarnation: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The agent's record of one alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasState {
    pub alias: Alias,

    /// Family of the incarnation the agent is managing
    pub family: Option<Family>,

    pub phase: AliasPhase,

    /// Highest revision a running job was confirmed for; never regresses
    pub last_reconciled_revision: Option<Revision>,

    /// Revision of the most recent start attempt (or failed prepare)
    pub attempted_revision: Option<Revision>,

    /// Job the agent believes it owns
    pub job_id: Option<JobId>,

    /// Number of jobs started for this alias so far
    pub incarnation: u64,

    /// Passes spent in the current phase
    pub passes_in_phase: u32,

    /// Consecutive starts issued without the job showing up
    pub start_attempts: u32,

    pub stop_reason: Option<AbortReason>,

    pub last_error: Option<String>,

    /// Last status written back to the node
    pub reported: Option<NodeStatus>,
}

impl AliasState {
    pub fn new(alias: Alias) -> Self {
        Self {
            alias,
            family: None,
            phase: AliasPhase::Absent,
            last_reconciled_revision: None,
            attempted_revision: None,
            job_id: None,
            incarnation: 0,
            passes_in_phase: 0,
            start_attempts: 0,
            stop_reason: None,
            last_error: None,
            reported: None,
        }
    }

    /// Move to `phase`, restarting the pass counter on an actual change.
    pub fn enter(&mut self, phase: AliasPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.passes_in_phase = 0;
        }
    }

    /// Count one more pass spent waiting in the current phase.
    pub fn tick(&mut self) {
        self.passes_in_phase = self.passes_in_phase.saturating_add(1);
    }

    /// Record a confirmed revision. Older revisions are ignored.
    pub fn record_reconciled(&mut self, revision: Revision) {
        if self.last_reconciled_revision.map_or(true, |last| revision > last) {
            self.last_reconciled_revision = Some(revision);
        }
    }

    /// Whether `revision` is newer than anything a running job was confirmed for.
    pub fn is_newer(&self, revision: Revision) -> bool {
        self.last_reconciled_revision.map_or(true, |last| revision > last)
    }

    /// A start for `revision` was accepted by the scheduler.
    pub fn started(&mut self, job_id: JobId, family: Family, revision: Revision) {
        if self.phase != AliasPhase::Starting {
            self.start_attempts = 0;
        }
        self.start_attempts += 1;
        self.incarnation += 1;
        self.job_id = Some(job_id);
        self.family = Some(family);
        self.attempted_revision = Some(revision);
        self.stop_reason = None;
        self.last_error = None;
        self.enter(AliasPhase::Starting);
        self.passes_in_phase = 0;
    }

    /// A live job is confirmed as the one backing this alias.
    pub fn track(&mut self, job_id: JobId, family: Family, revision: Option<Revision>) {
        if let Some(revision) = revision.or(self.attempted_revision) {
            self.record_reconciled(revision);
        }
        self.job_id = Some(job_id);
        self.family = Some(family);
        self.start_attempts = 0;
        self.last_error = None;
        self.enter(AliasPhase::Running);
    }

    /// An abort was accepted; wait for the job to terminate in `phase`.
    pub fn stopping(&mut self, phase: AliasPhase, reason: AbortReason) {
        self.stop_reason = Some(reason);
        self.enter(phase);
        self.passes_in_phase = 0;
    }

    /// Park the alias until its speclet changes.
    pub fn park(&mut self, family: Family, revision: Revision, reason: impl Into<String>) {
        self.family = Some(family);
        self.attempted_revision = Some(revision);
        self.start_attempts = 0;
        self.last_error = Some(reason.into());
        self.enter(AliasPhase::Failed);
    }

    /// Status to report on the node, given the state of the tracked job.
    pub fn status(&self, job_state: Option<JobState>) -> NodeStatus {
        NodeStatus {
            phase: self.phase,
            job_id: self.job_id.clone(),
            job_state,
            reconciled_revision: self.last_reconciled_revision,
            incarnation: self.incarnation,
            error: self.last_error.clone(),
        }
    }
}
