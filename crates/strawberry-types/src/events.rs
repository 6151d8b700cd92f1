//! Event types for agent observability
//!
//! Events describe what the agent decided and did, one envelope per decision.

use crate::{Alias, JobId, Revision, SkipReason};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all agent events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Event severity
    pub severity: EventSeverity,

    /// Name of the agent instance that emitted the event
    pub agent: Option<String>,

    /// The actual event
    pub event: AgentEvent,
}

impl AgentEventEnvelope {
    pub fn new(event: AgentEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            severity: event.severity(),
            agent: None,
            event,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Why the agent aborted a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The alias node no longer exists
    Dangling,
    /// The speclet changed and the controller asked for a restart
    Restart,
    /// An older job sharing the alias with a newer one
    Duplicate,
    /// The family tag of the node changed
    FamilyChanged,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AbortReason::Dangling => "dangling",
            AbortReason::Restart => "restart",
            AbortReason::Duplicate => "duplicate",
            AbortReason::FamilyChanged => "family_changed",
        };
        f.write_str(name)
    }
}

/// Agent events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    /// A job was started for an alias
    JobStarted {
        alias: Alias,
        job_id: JobId,
        revision: Revision,
        incarnation: u64,
    },

    /// A job was aborted
    JobAborted {
        alias: Alias,
        job_id: JobId,
        reason: AbortReason,
    },

    /// An already running job was taken over after an agent restart
    JobAdopted { alias: Alias, job_id: JobId },

    /// An alias was parked in the failed phase
    AliasFailed {
        alias: Alias,
        revision: Revision,
        reason: String,
    },

    /// A tree node was ignored
    AliasSkipped { alias: Alias, reason: SkipReason },

    /// A reconciliation pass finished
    PassCompleted {
        pass: u64,
        aliases: usize,
        started: usize,
        aborted: usize,
        failed: usize,
        duration_ms: u64,
    },
}

impl AgentEvent {
    pub fn severity(&self) -> EventSeverity {
        match self {
            AgentEvent::JobStarted { .. } | AgentEvent::JobAdopted { .. } => EventSeverity::Info,
            AgentEvent::JobAborted { reason, .. } => match reason {
                AbortReason::Duplicate => EventSeverity::Warning,
                _ => EventSeverity::Info,
            },
            AgentEvent::AliasFailed { .. } => EventSeverity::Error,
            AgentEvent::AliasSkipped { .. } => EventSeverity::Warning,
            AgentEvent::PassCompleted { .. } => EventSeverity::Debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_takes_event_severity() {
        let envelope = AgentEventEnvelope::new(AgentEvent::AliasFailed {
            alias: Alias::new("test"),
            revision: Revision::new(1),
            reason: "invalid speclet".to_string(),
        })
        .with_agent("test-agent");

        assert_eq!(envelope.severity, EventSeverity::Error);
        assert_eq!(envelope.agent.as_deref(), Some("test-agent"));
    }

    #[test]
    fn test_duplicate_abort_is_a_warning() {
        let event = AgentEvent::JobAborted {
            alias: Alias::new("test"),
            job_id: JobId::generate(),
            reason: AbortReason::Duplicate,
        };
        assert_eq!(event.severity(), EventSeverity::Warning);
    }
}
