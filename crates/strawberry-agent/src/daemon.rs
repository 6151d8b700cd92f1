//! Daemon lifecycle: runs an agent until a shutdown signal arrives

use crate::agent::Agent;
use crate::cluster::JobScheduler;
use crate::config::DaemonConfig;
use crate::controller::ControllerRegistry;
use crate::error::AgentResult;
use crate::tree::TreeStore;
use std::sync::Arc;
use strawberry_types::{AgentEventEnvelope, EventSeverity};
use tokio::sync::broadcast;

/// Strawberry daemon
pub struct Daemon {
    agent: Agent,
}

impl Daemon {
    /// Create a daemon around the given backends
    pub fn new(
        config: DaemonConfig,
        tree: Arc<dyn TreeStore>,
        scheduler: Arc<dyn JobScheduler>,
        controllers: ControllerRegistry,
    ) -> AgentResult<Self> {
        let agent = Agent::new(config.agent, tree, scheduler, controllers)?;
        Ok(Self { agent })
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Run until Ctrl+C or SIGTERM, then stop the agent
    pub async fn run(self) -> AgentResult<()> {
        let events = tokio::spawn(log_events(self.agent.subscribe_events()));

        self.agent.start().await?;

        shutdown_signal().await;

        tracing::info!("Strawberry daemon shutting down");
        self.agent.stop().await;

        // Dropping the agent closes the event channel
        drop(self.agent);
        if let Err(e) = events.await {
            tracing::error!(error = %e, "Event logger task failed");
        }

        Ok(())
    }
}

/// Mirror warning and error events into the log
async fn log_events(mut events: broadcast::Receiver<AgentEventEnvelope>) {
    loop {
        match events.recv().await {
            Ok(envelope) => match envelope.severity {
                EventSeverity::Error => {
                    tracing::error!(event = ?envelope.event, "Agent event");
                }
                EventSeverity::Warning => {
                    tracing::warn!(event = ?envelope.event, "Agent event");
                }
                EventSeverity::Info | EventSeverity::Debug => {
                    tracing::trace!(event = ?envelope.event, "Agent event");
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
