//! Desired and actual state snapshots
//!
//! Both snapshots are rebuilt from scratch on every poll and never persisted.

use crate::{Alias, Family, JobId, JobState, JobStatus, Revision};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the tree says should be running for an alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredEntry {
    pub alias: Alias,
    pub family: Family,
    pub revision: Revision,
    pub speclet: serde_json::Value,
}

/// Why a tree node was left out of the desired snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The family attribute is missing
    MissingFamily,
    /// The family attribute is not a string
    InvalidFamily,
    /// No controller is registered for the family
    UnknownFamily(Family),
    /// The node exists but could not be read this time
    Unreadable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingFamily => write!(f, "family attribute is missing"),
            SkipReason::InvalidFamily => write!(f, "family attribute is not a string"),
            SkipReason::UnknownFamily(family) => {
                write!(f, "no controller registered for family {}", family)
            }
            SkipReason::Unreadable => write!(f, "node could not be read"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedNode {
    pub alias: Alias,
    pub reason: SkipReason,
}

/// Desired state of every alias under the root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredSnapshot {
    pub entries: HashMap<Alias, DesiredEntry>,
    pub skipped: Vec<SkippedNode>,
    pub collected_at: chrono::DateTime<chrono::Utc>,
}

impl DesiredSnapshot {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
            skipped: Vec::new(),
            collected_at: chrono::Utc::now(),
        }
    }

    pub fn get(&self, alias: &Alias) -> Option<&DesiredEntry> {
        self.entries.get(alias)
    }

    /// Whether the node of `alias` exists but was skipped
    pub fn is_skipped(&self, alias: &Alias) -> bool {
        self.skipped.iter().any(|node| &node.alias == alias)
    }
}

/// The live job currently backing an alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualEntry {
    pub alias: Alias,
    pub job_id: JobId,
    pub state: JobState,
    /// Revision the job was started with
    pub revision: Option<Revision>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl ActualEntry {
    pub fn from_status(alias: Alias, status: &JobStatus) -> Self {
        Self {
            alias,
            job_id: status.id.clone(),
            state: status.state,
            revision: status.revision,
            started_at: status.started_at,
        }
    }
}

/// Actual state of the cluster: one winning job per alias plus losers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActualSnapshot {
    pub entries: HashMap<Alias, ActualEntry>,

    /// Older live jobs sharing an alias with a newer one; to be aborted
    pub duplicates: Vec<JobStatus>,
}

impl ActualSnapshot {
    pub fn get(&self, alias: &Alias) -> Option<&ActualEntry> {
        self.entries.get(alias)
    }
}
