//! Configuration for strawberry-agent

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Agent configuration
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name of this agent, attached to emitted events
    #[serde(default = "default_name")]
    pub name: String,

    /// Tree location whose children are the managed aliases
    #[serde(default = "default_root")]
    pub root: String,

    /// Full reconciliation cadence in milliseconds
    #[serde(default = "default_pass_period")]
    pub pass_period_ms: u64,

    /// Speclet observation cadence in milliseconds
    #[serde(default = "default_revision_collect_period")]
    pub revision_collect_period_ms: u64,

    /// Passes to wait for a started job before starting it again
    #[serde(default = "default_start_timeout_passes")]
    pub start_timeout_passes: u32,

    /// Starts to issue before parking the alias as failed
    #[serde(default = "default_max_start_attempts")]
    pub max_start_attempts: u32,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            root: default_root(),
            pass_period_ms: default_pass_period(),
            revision_collect_period_ms: default_revision_collect_period(),
            start_timeout_passes: default_start_timeout_passes(),
            max_start_attempts: default_max_start_attempts(),
            event_channel_capacity: default_event_capacity(),
        }
    }
}

impl AgentConfig {
    pub fn pass_period(&self) -> Duration {
        Duration::from_millis(self.pass_period_ms)
    }

    pub fn revision_collect_period(&self) -> Duration {
        Duration::from_millis(self.revision_collect_period_ms)
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.root.trim().is_empty() {
            return Err(AgentError::Config("root must not be empty".to_string()));
        }
        if self.pass_period_ms == 0 {
            return Err(AgentError::Config(
                "pass_period_ms must be positive".to_string(),
            ));
        }
        if self.revision_collect_period_ms == 0 {
            return Err(AgentError::Config(
                "revision_collect_period_ms must be positive".to_string(),
            ));
        }
        if self.max_start_attempts == 0 {
            return Err(AgentError::Config(
                "max_start_attempts must be positive".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(AgentError::Config(
                "event_channel_capacity must be positive".to_string(),
            ));
        }
        if self.revision_collect_period_ms > self.pass_period_ms {
            tracing::warn!(
                pass_period_ms = self.pass_period_ms,
                revision_collect_period_ms = self.revision_collect_period_ms,
                "Revision collect period is longer than pass period"
            );
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_name() -> String {
    "strawberry".to_string()
}

fn default_root() -> String {
    "//sys/strawberry".to_string()
}

fn default_pass_period() -> u64 {
    5_000
}

fn default_revision_collect_period() -> u64 {
    1_000
}

fn default_start_timeout_passes() -> u32 {
    3
}

fn default_max_start_attempts() -> u32 {
    5
}

fn default_event_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and `STRAWBERRY_*` variables
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables, e.g. STRAWBERRY_AGENT__PASS_PERIOD_MS
        builder = builder.add_source(
            config::Environment::with_prefix("STRAWBERRY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
