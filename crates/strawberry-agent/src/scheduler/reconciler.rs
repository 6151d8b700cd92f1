//! Reconciliation pass
//!
//! A pass takes a desired snapshot (cached or freshly polled) and an actual
//! snapshot, aborts duplicate jobs, then advances every known alias by one
//! step. Aliases are processed concurrently; each alias future only touches
//! its own state and node. Aliases whose node exists but was skipped by the
//! watcher keep their state untouched for the pass.

use super::machine::{decide, Effect, Limits};
use crate::cluster::JobScheduler;
use crate::config::AgentConfig;
use crate::controller::ControllerRegistry;
use crate::error::{SchedulerError, TreeError};
use crate::index::OperationIndex;
use crate::tree::{child_path, TreeStore, STATUS_ATTRIBUTE};
use crate::watcher::TreeWatcher;
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strawberry_types::{
    AbortReason, ActualEntry, AgentEvent, AgentEventEnvelope, Alias, AliasPhase, AliasState,
    DesiredEntry, DesiredSnapshot, JobState, JobStatus,
};
use tokio::sync::broadcast;

/// Per-alias state carried from one pass to the next
pub type AliasStates = HashMap<Alias, AliasState>;

/// Summary of a completed pass
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Pass number, starting at 1
    pub pass: u64,
    /// Aliases known after the pass
    pub aliases: usize,
    pub started: Vec<Alias>,
    pub aborted: Vec<(Alias, AbortReason)>,
    pub failed: Vec<Alias>,
    /// Tree nodes ignored by the watcher
    pub skipped: Vec<Alias>,
    pub duration: Duration,
}

/// What happened to one alias during a pass
struct AliasOutcome {
    alias: Alias,
    /// `None` when the alias is forgotten
    state: Option<AliasState>,
    started: bool,
    aborted: Option<AbortReason>,
    failed: bool,
}

impl AliasOutcome {
    fn new(alias: Alias) -> Self {
        Self {
            alias,
            state: None,
            started: false,
            aborted: None,
            failed: false,
        }
    }
}

/// Drives aliases toward their desired state, one pass at a time
pub struct Reconciler {
    watcher: TreeWatcher,
    index: OperationIndex,
    tree: Arc<dyn TreeStore>,
    scheduler: Arc<dyn JobScheduler>,
    controllers: Arc<ControllerRegistry>,
    limits: Limits,
    root: String,
    agent_name: String,
    event_tx: broadcast::Sender<AgentEventEnvelope>,
    passes: u64,
    /// Skipped aliases already reported, so each is announced once
    reported_skips: HashSet<Alias>,
}

impl Reconciler {
    pub fn new(
        config: &AgentConfig,
        tree: Arc<dyn TreeStore>,
        scheduler: Arc<dyn JobScheduler>,
        controllers: Arc<ControllerRegistry>,
        event_tx: broadcast::Sender<AgentEventEnvelope>,
    ) -> Self {
        Self {
            watcher: TreeWatcher::new(tree.clone(), controllers.clone(), config.root.clone()),
            index: OperationIndex::new(scheduler.clone()),
            tree,
            scheduler,
            controllers,
            limits: Limits::from_config(config),
            root: config.root.clone(),
            agent_name: config.name.clone(),
            event_tx,
            passes: 0,
            reported_skips: HashSet::new(),
        }
    }

    /// Number of passes attempted so far
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Run one pass over `states` and return the states for the next one.
    ///
    /// When `cached` is `None` the tree is polled directly. If either snapshot
    /// cannot be collected the pass is skipped and `states` come back as-is.
    #[tracing::instrument(name = "pass", skip_all, fields(pass = self.passes + 1))]
    pub async fn run_pass(
        &mut self,
        mut states: AliasStates,
        cached: Option<Arc<DesiredSnapshot>>,
    ) -> (AliasStates, Option<PassReport>) {
        let started_at = Instant::now();
        self.passes += 1;
        let pass = self.passes;

        let desired = match cached {
            Some(snapshot) => snapshot,
            None => match self.watcher.poll().await {
                Ok(snapshot) => Arc::new(snapshot),
                Err(e) => {
                    tracing::warn!(pass, error = %e, "Skipping pass: failed to collect desired state");
                    return (states, None);
                }
            },
        };

        let actual = match self.index.poll().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(pass, error = %e, "Skipping pass: failed to collect actual state");
                return (states, None);
            }
        };

        self.report_skips(&desired);

        let mut report = PassReport {
            pass,
            skipped: desired.skipped.iter().map(|node| node.alias.clone()).collect(),
            ..PassReport::default()
        };
        report.aborted = self.abort_duplicates(&actual.duplicates).await;

        let aliases: BTreeSet<Alias> = states
            .keys()
            .chain(desired.entries.keys())
            .chain(actual.entries.keys())
            .cloned()
            .collect();

        // A skipped node still exists: its alias is held as-is, never treated as dangling
        let (held, active): (Vec<Alias>, Vec<Alias>) = aliases
            .into_iter()
            .partition(|alias| desired.get(alias).is_none() && desired.is_skipped(alias));
        let held: Vec<AliasState> = held
            .iter()
            .filter_map(|alias| states.remove(alias))
            .collect();

        let work: Vec<_> = active
            .into_iter()
            .map(|alias| {
                let state = states
                    .remove(&alias)
                    .unwrap_or_else(|| AliasState::new(alias.clone()));
                (state, desired.get(&alias), actual.get(&alias))
            })
            .collect();

        let this = &*self;
        let outcomes = join_all(
            work.into_iter()
                .map(|(state, desired, actual)| this.reconcile_alias(state, desired, actual)),
        )
        .await;

        let mut next: AliasStates = held
            .into_iter()
            .map(|state| (state.alias.clone(), state))
            .collect();
        for outcome in outcomes {
            if outcome.started {
                report.started.push(outcome.alias.clone());
            }
            if let Some(reason) = outcome.aborted {
                report.aborted.push((outcome.alias.clone(), reason));
            }
            if outcome.failed {
                report.failed.push(outcome.alias.clone());
            }
            if let Some(state) = outcome.state {
                next.insert(outcome.alias, state);
            }
        }

        report.aliases = next.len();
        report.duration = started_at.elapsed();

        tracing::debug!(
            pass,
            aliases = report.aliases,
            started = report.started.len(),
            aborted = report.aborted.len(),
            failed = report.failed.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Pass completed"
        );

        self.emit(AgentEvent::PassCompleted {
            pass,
            aliases: report.aliases,
            started: report.started.len(),
            aborted: report.aborted.len(),
            failed: report.failed.len(),
            duration_ms: report.duration.as_millis() as u64,
        });

        (next, Some(report))
    }

    async fn reconcile_alias(
        &self,
        mut state: AliasState,
        desired: Option<&DesiredEntry>,
        actual: Option<&ActualEntry>,
    ) -> AliasOutcome {
        let alias = state.alias.clone();
        let mut outcome = AliasOutcome::new(alias.clone());

        match decide(&state, desired, actual, &self.controllers, &self.limits) {
            Effect::Noop => {}

            Effect::Wait => state.tick(),

            Effect::Track {
                job_id,
                family,
                revision,
            } => {
                let adopted = state.phase == AliasPhase::Absent;
                state.track(job_id.clone(), family, revision);
                if adopted {
                    tracing::info!(alias = %alias, job_id = %job_id, "Adopted running job");
                    self.emit(AgentEvent::JobAdopted { alias, job_id });
                } else {
                    tracing::info!(alias = %alias, job_id = %job_id, "Job is running");
                }
            }

            Effect::AcceptRevision(revision) => {
                tracing::debug!(alias = %alias, %revision, "Revision does not need a restart");
                state.record_reconciled(revision);
            }

            Effect::Start {
                family,
                revision,
                request,
            } => {
                let previous = state.phase;
                match self.scheduler.start_job(request, &alias.tag(), revision).await {
                    Ok(job_id) => {
                        state.started(job_id.clone(), family, revision);
                        tracing::info!(
                            alias = %alias,
                            job_id = %job_id,
                            %revision,
                            incarnation = state.incarnation,
                            previous_phase = %previous,
                            "Started job"
                        );
                        self.emit(AgentEvent::JobStarted {
                            alias,
                            job_id,
                            revision,
                            incarnation: state.incarnation,
                        });
                        outcome.started = true;
                    }
                    Err(e) if e.is_transient() => {
                        tracing::warn!(alias = %alias, error = %e, "Failed to start job, retrying next pass");
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        state.park(family, revision, reason.clone());
                        tracing::error!(alias = %alias, %revision, error = %reason, "Job start rejected");
                        self.emit(AgentEvent::AliasFailed {
                            alias,
                            revision,
                            reason,
                        });
                        outcome.failed = true;
                    }
                }
            }

            Effect::Abort {
                job_id,
                reason,
                then,
            } => match self.scheduler.abort_job(&job_id).await {
                Ok(()) | Err(SchedulerError::JobNotFound(_)) => {
                    state.job_id = Some(job_id.clone());
                    state.stopping(then, reason);
                    tracing::info!(alias = %alias, job_id = %job_id, %reason, "Aborted job");
                    self.emit(AgentEvent::JobAborted {
                        alias,
                        job_id,
                        reason,
                    });
                    outcome.aborted = Some(reason);
                }
                Err(e) => {
                    tracing::warn!(
                        alias = %alias,
                        job_id = %job_id,
                        error = %e,
                        "Failed to abort job, retrying next pass"
                    );
                }
            },

            Effect::Park {
                family,
                revision,
                reason,
            } => {
                state.park(family, revision, reason.clone());
                tracing::error!(alias = %alias, %revision, error = %reason, "Alias parked as failed");
                self.emit(AgentEvent::AliasFailed {
                    alias,
                    revision,
                    reason,
                });
                outcome.failed = true;
            }

            Effect::Forget => {
                tracing::debug!(alias = %alias, "Forgetting alias");
                return outcome;
            }
        }

        if desired.is_some() {
            let job_state = actual
                .filter(|actual| state.job_id.as_ref() == Some(&actual.job_id))
                .map(|actual| actual.state);
            self.write_status(&mut state, job_state).await;
        }

        outcome.state = Some(state);
        outcome
    }

    /// Write the alias status to its node when it changed since the last write.
    async fn write_status(&self, state: &mut AliasState, job_state: Option<JobState>) {
        let status = state.status(job_state);
        if state.reported.as_ref() == Some(&status) {
            return;
        }

        let value = match serde_json::to_value(&status) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(alias = %state.alias, error = %e, "Failed to encode alias status");
                return;
            }
        };

        let path = child_path(&self.root, state.alias.as_str());
        match self.tree.set_attribute(&path, STATUS_ATTRIBUTE, value).await {
            Ok(()) => state.reported = Some(status),
            // Node removed mid-pass; the next pass treats the alias as dangling
            Err(TreeError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(alias = %state.alias, error = %e, "Failed to write alias status");
            }
        }
    }

    async fn abort_duplicates(&self, duplicates: &[JobStatus]) -> Vec<(Alias, AbortReason)> {
        let aborts = duplicates.iter().filter_map(|job| {
            let alias = job.alias()?;
            Some(async move {
                match self.scheduler.abort_job(&job.id).await {
                    Ok(()) => {
                        tracing::warn!(alias = %alias, job_id = %job.id, "Aborted duplicate job");
                        self.emit(AgentEvent::JobAborted {
                            alias: alias.clone(),
                            job_id: job.id.clone(),
                            reason: AbortReason::Duplicate,
                        });
                        Some((alias, AbortReason::Duplicate))
                    }
                    Err(SchedulerError::JobNotFound(_)) => None,
                    Err(e) => {
                        tracing::warn!(
                            alias = %alias,
                            job_id = %job.id,
                            error = %e,
                            "Failed to abort duplicate job"
                        );
                        None
                    }
                }
            })
        });

        join_all(aborts).await.into_iter().flatten().collect()
    }

    fn report_skips(&mut self, desired: &DesiredSnapshot) {
        let skipped: HashSet<Alias> = desired.skipped.iter().map(|node| node.alias.clone()).collect();
        self.reported_skips.retain(|alias| skipped.contains(alias));

        for node in &desired.skipped {
            if self.reported_skips.insert(node.alias.clone()) {
                self.emit(AgentEvent::AliasSkipped {
                    alias: node.alias.clone(),
                    reason: node.reason.clone(),
                });
            }
        }
    }

    fn emit(&self, event: AgentEvent) {
        let envelope = AgentEventEnvelope::new(event).with_agent(self.agent_name.as_str());
        // No subscribers is fine
        let _ = self.event_tx.send(envelope);
    }
}
