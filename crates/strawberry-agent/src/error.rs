//! Error types for strawberry-agent

use strawberry_types::{Alias, JobId};
use thiserror::Error;

/// Agent-level errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The agent was built without any family controller
    #[error("No controllers registered")]
    NoControllers,

    /// `start` was called on a running agent
    #[error("Agent is already running")]
    AlreadyRunning,

    /// Tree store error
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Metadata tree errors
#[derive(Debug, Error)]
pub enum TreeError {
    /// Call failed, worth retrying on the next tick
    #[error("Transient tree error: {0}")]
    Transient(String),

    /// Node does not exist
    #[error("Node not found: {0}")]
    NotFound(String),

    /// Attribute holds an unusable value
    #[error("Invalid attribute {attribute} on {path}: {reason}")]
    InvalidAttribute {
        path: String,
        attribute: String,
        reason: String,
    },
}

/// Cluster scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Call failed, worth retrying on the next tick
    #[error("Transient scheduler error: {0}")]
    Transient(String),

    /// Job is unknown to the scheduler
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Scheduler refused the request for good
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl SchedulerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::Transient(_))
    }
}

/// Errors raised by family controllers
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Speclet cannot be parsed or validated
    #[error("Invalid speclet for {alias}: {reason}")]
    InvalidSpec { alias: Alias, reason: String },
}

impl ControllerError {
    pub fn invalid_spec(alias: &Alias, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            alias: alias.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for tree operations
pub type TreeResult<T> = Result<T, TreeError>;

/// Result type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
