//! Agent lifecycle
//!
//! A started agent runs two background tasks:
//! - the revision collector, which polls the tree every
//!   `revision_collect_period` and publishes the latest desired snapshot
//! - the pass loop, which runs a reconciliation pass every `pass_period`
//!   using the most recent published snapshot
//!
//! Stopping signals both tasks and waits for them. A pass already in flight
//! is allowed to finish.

use crate::cluster::JobScheduler;
use crate::config::AgentConfig;
use crate::controller::ControllerRegistry;
use crate::error::{AgentError, AgentResult};
use crate::scheduler::{AliasStates, Reconciler};
use crate::tree::TreeStore;
use crate::watcher::TreeWatcher;
use std::sync::Arc;
use std::time::Duration;
use strawberry_types::{AgentEventEnvelope, DesiredSnapshot};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

type SnapshotSender = watch::Sender<Option<Arc<DesiredSnapshot>>>;
type SnapshotReceiver = watch::Receiver<Option<Arc<DesiredSnapshot>>>;

/// Background tasks of a started agent
struct RunningTasks {
    shutdown_tx: watch::Sender<bool>,
    collector: JoinHandle<()>,
    passes: JoinHandle<()>,
}

/// Strawberry agent: keeps scheduler jobs in line with the alias nodes
/// under its root
pub struct Agent {
    config: AgentConfig,
    tree: Arc<dyn TreeStore>,
    scheduler: Arc<dyn JobScheduler>,
    controllers: Arc<ControllerRegistry>,
    event_tx: broadcast::Sender<AgentEventEnvelope>,
    running: Mutex<Option<RunningTasks>>,
}

impl Agent {
    /// Create a stopped agent.
    pub fn new(
        config: AgentConfig,
        tree: Arc<dyn TreeStore>,
        scheduler: Arc<dyn JobScheduler>,
        controllers: ControllerRegistry,
    ) -> AgentResult<Self> {
        config.validate()?;
        if controllers.is_empty() {
            return Err(AgentError::NoControllers);
        }

        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        Ok(Self {
            config,
            tree,
            scheduler,
            controllers: Arc::new(controllers),
            event_tx,
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Subscribe to agent events
    pub fn subscribe_events(&self) -> broadcast::Receiver<AgentEventEnvelope> {
        self.event_tx.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Start the background tasks.
    ///
    /// Alias states start out empty; jobs left running by an earlier
    /// incarnation of the agent are picked up again through their alias tags.
    pub async fn start(&self) -> AgentResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AgentError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);

        let watcher = TreeWatcher::new(
            self.tree.clone(),
            self.controllers.clone(),
            self.config.root.clone(),
        );
        let collector = tokio::spawn(collect_revisions(
            watcher,
            snapshot_tx,
            self.config.revision_collect_period(),
            shutdown_rx.clone(),
        ));

        let reconciler = Reconciler::new(
            &self.config,
            self.tree.clone(),
            self.scheduler.clone(),
            self.controllers.clone(),
            self.event_tx.clone(),
        );
        let passes = tokio::spawn(run_passes(
            reconciler,
            snapshot_rx,
            self.config.pass_period(),
            shutdown_rx,
        ));

        *running = Some(RunningTasks {
            shutdown_tx,
            collector,
            passes,
        });

        tracing::info!(
            agent = %self.config.name,
            root = %self.config.root,
            families = ?self.controllers.families(),
            pass_period_ms = self.config.pass_period_ms,
            "Agent started"
        );

        Ok(())
    }

    /// Stop the background tasks and wait for them to exit.
    ///
    /// Does nothing if the agent is not running.
    pub async fn stop(&self) {
        let Some(tasks) = self.running.lock().await.take() else {
            return;
        };

        let _ = tasks.shutdown_tx.send(true);

        if let Err(e) = tasks.passes.await {
            tracing::error!(error = %e, "Pass loop task failed");
        }
        if let Err(e) = tasks.collector.await {
            tracing::error!(error = %e, "Revision collector task failed");
        }

        tracing::info!(agent = %self.config.name, "Agent stopped");
    }
}

async fn collect_revisions(
    watcher: TreeWatcher,
    snapshot_tx: SnapshotSender,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        match watcher.poll().await {
            Ok(snapshot) => {
                // The pass loop may already be gone during shutdown
                let _ = snapshot_tx.send(Some(Arc::new(snapshot)));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to collect revisions");
            }
        }
    }

    tracing::debug!("Revision collector stopped");
}

async fn run_passes(
    mut reconciler: Reconciler,
    snapshots: SnapshotReceiver,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut states = AliasStates::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let cached = snapshots.borrow().clone();
        let (next, _) = reconciler.run_pass(states, cached).await;
        states = next;
    }

    tracing::debug!(passes = reconciler.passes(), "Pass loop stopped");
}
