//! Family controllers
//!
//! A controller knows how to turn an alias speclet into a job start request
//! for one workload family. Controllers never talk to the tree or the
//! scheduler; the agent executes whatever they decide.

mod sleep;

pub use sleep::{SleepController, SLEEP_FAMILY};

use crate::error::ControllerError;
use std::collections::HashMap;
use std::sync::Arc;
use strawberry_types::{Alias, JobStartRequest, Revision};

/// Capability contract implemented by every workload family
pub trait Controller: Send + Sync {
    /// Family name used for registration lookup
    fn family(&self) -> &str;

    /// Build the request starting a job for `alias`.
    ///
    /// Must be a pure function of its inputs. Fails with
    /// [`ControllerError::InvalidSpec`] if the speclet cannot be used.
    fn prepare(
        &self,
        alias: &Alias,
        speclet: &serde_json::Value,
    ) -> Result<JobStartRequest, ControllerError>;

    /// Decide whether the running job must be replaced for `revision`.
    ///
    /// `observed` is the revision the running job was started with. The
    /// default restarts on any revision change.
    fn needs_restart(
        &self,
        _alias: &Alias,
        _speclet: &serde_json::Value,
        revision: Revision,
        observed: Option<Revision>,
    ) -> bool {
        observed != Some(revision)
    }
}

/// Read-only family → controller mapping built before the agent starts
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    controllers: HashMap<String, Arc<dyn Controller>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a controller, replacing any previous one for the same family.
    pub fn with_controller(mut self, controller: Arc<dyn Controller>) -> Self {
        self.controllers
            .insert(controller.family().to_string(), controller);
        self
    }

    pub fn get(&self, family: &str) -> Option<&Arc<dyn Controller>> {
        self.controllers.get(family)
    }

    pub fn contains(&self, family: &str) -> bool {
        self.controllers.contains_key(family)
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn families(&self) -> Vec<&str> {
        let mut families: Vec<&str> = self.controllers.keys().map(String::as_str).collect();
        families.sort_unstable();
        families
    }
}

impl std::fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("families", &self.families())
            .finish()
    }
}

impl FromIterator<Arc<dyn Controller>> for ControllerRegistry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Controller>>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |registry, controller| registry.with_controller(controller))
    }
}
