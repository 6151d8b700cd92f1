//! Per-alias lifecycle state machine
//!
//! [`decide`] looks at one alias's state together with its desired and actual
//! entries and picks the single effect to carry out this pass. It performs no
//! I/O; the reconciler executes the effect and updates the state.
//!
//! A start is never chosen while a live job is visible for the alias, so a
//! restart always takes two passes: abort, then start once the old job is gone.

use crate::config::AgentConfig;
use crate::controller::{Controller, ControllerRegistry};
use strawberry_types::{
    AbortReason, ActualEntry, AliasPhase, AliasState, DesiredEntry, Family, JobId,
    JobStartRequest, JobState, Revision,
};

/// What the reconciler must do for an alias this pass
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Nothing to do
    Noop,
    /// Keep waiting in the current phase
    Wait,
    /// Take the live job as the one backing the alias
    Track {
        job_id: JobId,
        family: Family,
        revision: Option<Revision>,
    },
    /// The running job stays; the new revision counts as reconciled
    AcceptRevision(Revision),
    /// Start a new job
    Start {
        family: Family,
        revision: Revision,
        request: JobStartRequest,
    },
    /// Abort a job and wait for it in `then`
    Abort {
        job_id: JobId,
        reason: AbortReason,
        then: AliasPhase,
    },
    /// Park the alias until its speclet changes
    Park {
        family: Family,
        revision: Revision,
        reason: String,
    },
    /// Drop the alias record
    Forget,
}

/// Retry bounds applied by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Passes to wait for a started or aborted job before acting again
    pub start_timeout_passes: u32,
    /// Starts to issue before parking the alias
    pub max_start_attempts: u32,
}

impl Limits {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            start_timeout_passes: config.start_timeout_passes,
            max_start_attempts: config.max_start_attempts,
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// Pick the effect for one alias.
pub fn decide(
    state: &AliasState,
    desired: Option<&DesiredEntry>,
    actual: Option<&ActualEntry>,
    controllers: &ControllerRegistry,
    limits: &Limits,
) -> Effect {
    let Some(desired) = desired else {
        return decide_without_node(state, actual, limits);
    };

    // The watcher drops nodes of unregistered families
    let Some(controller) = controllers.get(desired.family.as_str()) else {
        return Effect::Noop;
    };
    let controller = controller.as_ref();

    let family_changed = state
        .family
        .as_ref()
        .is_some_and(|family| family != &desired.family);

    match state.phase {
        AliasPhase::Absent => match actual {
            Some(actual) => track(actual, desired),
            None => start(desired, controller),
        },

        AliasPhase::Starting => match actual {
            Some(actual) if family_changed => {
                abort(actual, AbortReason::FamilyChanged, AliasPhase::Stopping)
            }
            Some(actual) => match actual.state {
                JobState::Starting => Effect::Wait,
                _ => track(actual, desired),
            },
            None if family_changed => start(desired, controller),
            None if state.passes_in_phase < limits.start_timeout_passes => Effect::Wait,
            None if state.start_attempts >= limits.max_start_attempts => Effect::Park {
                family: desired.family.clone(),
                revision: state.attempted_revision.unwrap_or(desired.revision),
                reason: format!(
                    "job did not start after {} attempts",
                    state.start_attempts
                ),
            },
            None => start(desired, controller),
        },

        AliasPhase::Running => match actual {
            None => start(desired, controller),
            Some(actual) if family_changed => {
                abort(actual, AbortReason::FamilyChanged, AliasPhase::Stopping)
            }
            Some(actual) if state.is_newer(desired.revision) => {
                if controller.needs_restart(
                    &desired.alias,
                    &desired.speclet,
                    desired.revision,
                    actual.revision,
                ) {
                    abort(actual, AbortReason::Restart, AliasPhase::Restarting)
                } else {
                    Effect::AcceptRevision(desired.revision)
                }
            }
            Some(actual) if state.job_id.as_ref() != Some(&actual.job_id) => {
                track(actual, desired)
            }
            Some(_) => Effect::Noop,
        },

        AliasPhase::Restarting | AliasPhase::Stopping => match actual {
            None => start(desired, controller),
            Some(actual) => wait_or_abort_again(state, actual, limits),
        },

        AliasPhase::Failed => {
            let revision_changed =
                state.attempted_revision != Some(desired.revision) || family_changed;
            match actual {
                None if revision_changed => start(desired, controller),
                None => Effect::Noop,
                Some(actual) if revision_changed => {
                    abort(actual, AbortReason::Restart, AliasPhase::Restarting)
                }
                // The last attempt came up after all
                Some(actual) if actual.revision.is_some() && actual.revision == state.attempted_revision => {
                    track(actual, desired)
                }
                Some(_) => Effect::Noop,
            }
        }
    }
}

/// The node is gone: abort whatever still runs, then forget the alias.
fn decide_without_node(state: &AliasState, actual: Option<&ActualEntry>, limits: &Limits) -> Effect {
    match actual {
        None => Effect::Forget,
        // An abort for this very job is already pending
        Some(actual)
            if matches!(state.phase, AliasPhase::Stopping | AliasPhase::Restarting)
                && state.job_id.as_ref() == Some(&actual.job_id)
                && state.passes_in_phase < limits.start_timeout_passes =>
        {
            Effect::Wait
        }
        Some(actual) => abort(actual, AbortReason::Dangling, AliasPhase::Stopping),
    }
}

/// An abort was issued earlier; repeat it if the job lingers too long or a
/// different job took the alias.
fn wait_or_abort_again(state: &AliasState, actual: &ActualEntry, limits: &Limits) -> Effect {
    let same_job = state.job_id.as_ref() == Some(&actual.job_id);
    if same_job && state.passes_in_phase < limits.start_timeout_passes {
        Effect::Wait
    } else {
        abort(
            actual,
            state.stop_reason.unwrap_or(AbortReason::Restart),
            state.phase,
        )
    }
}

fn start(desired: &DesiredEntry, controller: &dyn Controller) -> Effect {
    match controller.prepare(&desired.alias, &desired.speclet) {
        Ok(request) => Effect::Start {
            family: desired.family.clone(),
            revision: desired.revision,
            request,
        },
        Err(e) => Effect::Park {
            family: desired.family.clone(),
            revision: desired.revision,
            reason: e.to_string(),
        },
    }
}

fn track(actual: &ActualEntry, desired: &DesiredEntry) -> Effect {
    Effect::Track {
        job_id: actual.job_id.clone(),
        family: desired.family.clone(),
        revision: actual.revision,
    }
}

fn abort(actual: &ActualEntry, reason: AbortReason, then: AliasPhase) -> Effect {
    Effect::Abort {
        job_id: actual.job_id.clone(),
        reason,
        then,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SleepController;
    use std::sync::Arc;
    use strawberry_types::Alias;

    fn registry() -> ControllerRegistry {
        ControllerRegistry::new().with_controller(Arc::new(SleepController::new()))
    }

    fn limits() -> Limits {
        Limits {
            start_timeout_passes: 2,
            max_start_attempts: 2,
        }
    }

    fn desired(revision: u64) -> DesiredEntry {
        DesiredEntry {
            alias: Alias::new("test"),
            family: Family::new("sleep"),
            revision: Revision::new(revision),
            speclet: serde_json::json!({}),
        }
    }

    fn actual(job_id: &JobId, state: JobState, revision: u64) -> ActualEntry {
        ActualEntry {
            alias: Alias::new("test"),
            job_id: job_id.clone(),
            state,
            revision: Some(Revision::new(revision)),
            started_at: chrono::Utc::now(),
        }
    }

    fn running(job_id: &JobId, revision: u64) -> AliasState {
        let mut state = AliasState::new(Alias::new("test"));
        state.started(job_id.clone(), Family::new("sleep"), Revision::new(revision));
        state.track(job_id.clone(), Family::new("sleep"), Some(Revision::new(revision)));
        state
    }

    fn decide_for(
        state: &AliasState,
        desired: Option<&DesiredEntry>,
        actual: Option<&ActualEntry>,
    ) -> Effect {
        decide(state, desired, actual, &registry(), &limits())
    }

    #[test]
    fn test_absent_with_node_starts() {
        let state = AliasState::new(Alias::new("test"));
        let effect = decide_for(&state, Some(&desired(1)), None);
        assert!(matches!(
            effect,
            Effect::Start { revision, .. } if revision == Revision::new(1)
        ));
    }

    #[test]
    fn test_absent_with_job_adopts_it() {
        let state = AliasState::new(Alias::new("test"));
        let job = JobId::generate();
        let effect = decide_for(&state, Some(&desired(1)), Some(&actual(&job, JobState::Running, 1)));
        assert!(matches!(effect, Effect::Track { job_id, .. } if job_id == job));
    }

    #[test]
    fn test_invalid_speclet_parks() {
        let state = AliasState::new(Alias::new("test"));
        let mut entry = desired(3);
        entry.speclet = serde_json::json!("not an object");

        let effect = decide_for(&state, Some(&entry), None);
        assert!(matches!(
            effect,
            Effect::Park { revision, .. } if revision == Revision::new(3)
        ));
    }

    #[test]
    fn test_starting_becomes_running_once_job_runs() {
        let job = JobId::generate();
        let mut state = AliasState::new(Alias::new("test"));
        state.started(job.clone(), Family::new("sleep"), Revision::new(1));

        let effect = decide_for(&state, Some(&desired(1)), Some(&actual(&job, JobState::Starting, 1)));
        assert_eq!(effect, Effect::Wait);

        let effect = decide_for(&state, Some(&desired(1)), Some(&actual(&job, JobState::Running, 1)));
        assert!(matches!(effect, Effect::Track { .. }));
    }

    #[test]
    fn test_starting_retries_after_timeout_then_parks() {
        let mut state = AliasState::new(Alias::new("test"));
        state.started(JobId::generate(), Family::new("sleep"), Revision::new(1));

        assert_eq!(decide_for(&state, Some(&desired(1)), None), Effect::Wait);
        state.tick();
        assert_eq!(decide_for(&state, Some(&desired(1)), None), Effect::Wait);
        state.tick();
        assert!(matches!(
            decide_for(&state, Some(&desired(1)), None),
            Effect::Start { .. }
        ));

        state.started(JobId::generate(), Family::new("sleep"), Revision::new(1));
        state.tick();
        state.tick();
        assert!(matches!(
            decide_for(&state, Some(&desired(1)), None),
            Effect::Park { .. }
        ));
    }

    #[test]
    fn test_running_unchanged_is_noop() {
        let job = JobId::generate();
        let state = running(&job, 1);
        let effect = decide_for(&state, Some(&desired(1)), Some(&actual(&job, JobState::Running, 1)));
        assert_eq!(effect, Effect::Noop);
    }

    #[test]
    fn test_new_revision_aborts_for_restart() {
        let job = JobId::generate();
        let state = running(&job, 1);
        let effect = decide_for(&state, Some(&desired(2)), Some(&actual(&job, JobState::Running, 1)));
        assert_eq!(
            effect,
            Effect::Abort {
                job_id: job,
                reason: AbortReason::Restart,
                then: AliasPhase::Restarting,
            }
        );
    }

    #[test]
    fn test_restart_starts_only_after_old_job_is_gone() {
        let job = JobId::generate();
        let mut state = running(&job, 1);
        state.stopping(AliasPhase::Restarting, AbortReason::Restart);

        let effect = decide_for(&state, Some(&desired(2)), Some(&actual(&job, JobState::Running, 1)));
        assert_eq!(effect, Effect::Wait);

        let effect = decide_for(&state, Some(&desired(2)), None);
        assert!(matches!(
            effect,
            Effect::Start { revision, .. } if revision == Revision::new(2)
        ));
    }

    #[test]
    fn test_lingering_job_is_aborted_again() {
        let job = JobId::generate();
        let mut state = running(&job, 1);
        state.stopping(AliasPhase::Restarting, AbortReason::Restart);
        state.tick();
        state.tick();

        let effect = decide_for(&state, Some(&desired(2)), Some(&actual(&job, JobState::Running, 1)));
        assert!(matches!(effect, Effect::Abort { then: AliasPhase::Restarting, .. }));
    }

    #[test]
    fn test_deleted_node_aborts_job_in_any_phase() {
        let job = JobId::generate();
        let live = actual(&job, JobState::Running, 1);

        let mut starting = AliasState::new(Alias::new("test"));
        starting.started(job.clone(), Family::new("sleep"), Revision::new(1));
        let mut failed = AliasState::new(Alias::new("test"));
        failed.park(Family::new("sleep"), Revision::new(1), "bad speclet");

        for state in [
            AliasState::new(Alias::new("test")),
            starting,
            running(&job, 1),
            failed,
        ] {
            assert_eq!(
                decide_for(&state, None, Some(&live)),
                Effect::Abort {
                    job_id: job.clone(),
                    reason: AbortReason::Dangling,
                    then: AliasPhase::Stopping,
                }
            );
        }
    }

    #[test]
    fn test_pending_abort_is_not_repeated_when_node_goes_away() {
        let job = JobId::generate();
        let live = actual(&job, JobState::Running, 1);

        for (phase, reason) in [
            (AliasPhase::Restarting, AbortReason::Restart),
            (AliasPhase::Stopping, AbortReason::FamilyChanged),
        ] {
            let mut state = running(&job, 1);
            state.stopping(phase, reason);
            assert_eq!(decide_for(&state, None, Some(&live)), Effect::Wait);

            // Lingering past the timeout: abort again, now as dangling
            state.tick();
            state.tick();
            assert_eq!(
                decide_for(&state, None, Some(&live)),
                Effect::Abort {
                    job_id: job.clone(),
                    reason: AbortReason::Dangling,
                    then: AliasPhase::Stopping,
                }
            );
        }

        // A different job under the alias is aborted right away
        let mut state = running(&job, 1);
        state.stopping(AliasPhase::Stopping, AbortReason::FamilyChanged);
        let other = JobId::generate();
        assert!(matches!(
            decide_for(&state, None, Some(&actual(&other, JobState::Running, 1))),
            Effect::Abort { reason: AbortReason::Dangling, job_id, .. } if job_id == other
        ));
    }

    #[test]
    fn test_stopping_without_node_or_job_is_forgotten() {
        let job = JobId::generate();
        let mut state = running(&job, 1);
        state.stopping(AliasPhase::Stopping, AbortReason::Dangling);

        assert_eq!(
            decide_for(&state, None, Some(&actual(&job, JobState::Running, 1))),
            Effect::Wait
        );
        assert_eq!(decide_for(&state, None, None), Effect::Forget);
    }

    #[test]
    fn test_vanished_job_is_started_again() {
        let job = JobId::generate();
        let state = running(&job, 1);
        assert!(matches!(
            decide_for(&state, Some(&desired(1)), None),
            Effect::Start { .. }
        ));
    }

    #[test]
    fn test_failed_waits_for_new_revision() {
        let mut state = AliasState::new(Alias::new("test"));
        state.park(Family::new("sleep"), Revision::new(4), "bad speclet");

        assert_eq!(decide_for(&state, Some(&desired(4)), None), Effect::Noop);
        assert!(matches!(
            decide_for(&state, Some(&desired(5)), None),
            Effect::Start { .. }
        ));
    }

    #[test]
    fn test_family_change_replaces_job() {
        let job = JobId::generate();
        let mut state = running(&job, 1);
        state.family = Some(Family::new("chyt"));

        let effect = decide_for(&state, Some(&desired(2)), Some(&actual(&job, JobState::Running, 1)));
        assert!(matches!(
            effect,
            Effect::Abort { reason: AbortReason::FamilyChanged, then: AliasPhase::Stopping, .. }
        ));
    }

    #[test]
    fn test_unregistered_family_is_left_alone() {
        let state = AliasState::new(Alias::new("test"));
        let mut entry = desired(1);
        entry.family = Family::new("chyt");
        assert_eq!(decide_for(&state, Some(&entry), None), Effect::Noop);
    }
}
