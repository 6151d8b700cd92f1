//! The `sleep` family: a job that does nothing for a long time
//!
//! Used as the test workload and as the simplest example of a controller.

use super::Controller;
use crate::error::ControllerError;
use serde::Deserialize;
use strawberry_types::{Alias, Family, JobStartRequest};

pub const SLEEP_FAMILY: &str = "sleep";

const DEFAULT_DURATION_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SleepSpeclet {
    #[serde(default = "default_duration")]
    duration_secs: u64,

    #[serde(default)]
    pool: Option<String>,
}

fn default_duration() -> u64 {
    DEFAULT_DURATION_SECS
}

/// Controller for the `sleep` family
#[derive(Debug, Clone, Default)]
pub struct SleepController {
    default_pool: Option<String>,
}

impl SleepController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool used when the speclet does not name one.
    pub fn with_default_pool(mut self, pool: impl Into<String>) -> Self {
        self.default_pool = Some(pool.into());
        self
    }
}

impl Controller for SleepController {
    fn family(&self) -> &str {
        SLEEP_FAMILY
    }

    fn prepare(
        &self,
        alias: &Alias,
        speclet: &serde_json::Value,
    ) -> Result<JobStartRequest, ControllerError> {
        let speclet = match speclet {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            serde_json::Value::Object(_) => speclet.clone(),
            other => {
                return Err(ControllerError::invalid_spec(
                    alias,
                    format!("expected an object, got {}", other),
                ))
            }
        };

        let parsed: SleepSpeclet = serde_json::from_value(speclet)
            .map_err(|e| ControllerError::invalid_spec(alias, e.to_string()))?;

        if parsed.duration_secs == 0 {
            return Err(ControllerError::invalid_spec(
                alias,
                "duration_secs must be positive",
            ));
        }

        let spec = serde_json::json!({
            "command": format!("sleep {}", parsed.duration_secs),
            "job_count": 1,
        });

        let mut request = JobStartRequest::new(Family::new(SLEEP_FAMILY), spec)
            .with_title(format!("sleep for {}", alias));

        if let Some(pool) = parsed.pool.or_else(|| self.default_pool.clone()) {
            request = request.with_pool(pool);
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias() -> Alias {
        Alias::new("test")
    }

    #[test]
    fn test_empty_speclet_uses_defaults() {
        let request = SleepController::new()
            .prepare(&alias(), &serde_json::json!({}))
            .unwrap();

        assert_eq!(request.family.as_str(), "sleep");
        assert_eq!(request.title, "sleep for test");
        assert_eq!(request.spec["command"], format!("sleep {}", DEFAULT_DURATION_SECS));
        assert!(request.pool.is_none());
    }

    #[test]
    fn test_speclet_fields_are_applied() {
        let request = SleepController::new()
            .with_default_pool("default")
            .prepare(&alias(), &serde_json::json!({"duration_secs": 60, "pool": "research"}))
            .unwrap();

        assert_eq!(request.spec["command"], "sleep 60");
        assert_eq!(request.pool.as_deref(), Some("research"));
    }

    #[test]
    fn test_default_pool_fills_in() {
        let request = SleepController::new()
            .with_default_pool("default")
            .prepare(&alias(), &serde_json::Value::Null)
            .unwrap();
        assert_eq!(request.pool.as_deref(), Some("default"));
    }

    #[test]
    fn test_malformed_speclets_are_invalid() {
        let controller = SleepController::new();
        for speclet in [
            serde_json::json!("sleep"),
            serde_json::json!({"duration_secs": "long"}),
            serde_json::json!({"duration_secs": 0}),
            serde_json::json!({"unknown": true}),
        ] {
            assert!(matches!(
                controller.prepare(&alias(), &speclet),
                Err(ControllerError::InvalidSpec { .. })
            ));
        }
    }
}
