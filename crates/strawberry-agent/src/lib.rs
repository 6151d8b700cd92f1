//! Strawberry agent library
//!
//! This crate provides the components of the strawberry agent:
//! - Controller contract and the built-in `sleep` family
//! - Tree and scheduler boundaries with in-memory backends
//! - Tree watcher and operation index producing the two snapshots
//! - Per-alias state machine and the reconciliation pass
//! - Agent and daemon lifecycle

#![deny(unsafe_code)]

pub mod agent;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod fault;
pub mod index;
pub mod scheduler;
pub mod tree;
pub mod watcher;

pub use agent::Agent;
pub use cluster::{InMemoryCluster, JobScheduler};
pub use config::{AgentConfig, DaemonConfig, LoggingConfig};
pub use controller::{Controller, ControllerRegistry, SleepController, SLEEP_FAMILY};
pub use daemon::Daemon;
pub use error::{AgentError, AgentResult, ControllerError, SchedulerError, TreeError};
pub use index::OperationIndex;
pub use scheduler::{PassReport, Reconciler};
pub use tree::{InMemoryTreeStore, TreeStore};
pub use watcher::TreeWatcher;
