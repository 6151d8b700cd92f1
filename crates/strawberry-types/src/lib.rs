//! Strawberry Types - Core types for alias reconciliation
//!
//! Strawberry keeps long-running cluster operations in sync with declarative
//! specifications stored as nodes of a metadata tree. Every node under the
//! configured root is an *alias*; the agent makes sure exactly one operation
//! runs for it.
//!
//! ## Key Concepts
//!
//! - **Alias**: Name of a node under the root, the primary key for everything
//! - **Family**: Workload category selecting the controller of an alias
//! - **Speclet**: Family-defined payload stored on the node
//! - **Revision**: Version marker of a speclet, compared instead of contents
//! - **Job**: The scheduler-level operation backing an alias
//! - **AliasState**: The agent's per-alias lifecycle record
//! - **Events**: Observability stream of agent decisions

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod job;
pub mod snapshot;
pub mod state;

// Re-export main types
pub use events::{AbortReason, AgentEvent, AgentEventEnvelope, EventSeverity};
pub use ids::{Alias, Family, JobId, Revision, ALIAS_TAG_PREFIX};
pub use job::{JobStartRequest, JobState, JobStatus};
pub use snapshot::{
    ActualEntry, ActualSnapshot, DesiredEntry, DesiredSnapshot, SkipReason, SkippedNode,
};
pub use state::{AliasPhase, AliasState, NodeStatus};
