//! Strawberry daemon
//!
//! Runs the reconciliation agent against in-memory tree and scheduler
//! backends. Alias nodes of the `sleep` family can be seeded from the
//! command line.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use strawberry_agent::tree::child_path;
use strawberry_agent::{
    ControllerRegistry, Daemon, DaemonConfig, InMemoryCluster, InMemoryTreeStore, LoggingConfig,
    SleepController, SLEEP_FAMILY,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Strawberry daemon CLI
#[derive(Parser)]
#[command(name = "strawberryd")]
#[command(about = "Strawberry - keeps cluster jobs in sync with alias nodes", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "STRAWBERRY_CONFIG")]
    config: Option<String>,

    /// Tree root whose children are managed aliases
    #[arg(short, long)]
    root: Option<String>,

    /// Reconciliation pass period in milliseconds
    #[arg(long)]
    pass_period_ms: Option<u64>,

    /// Revision collection period in milliseconds
    #[arg(long)]
    revision_collect_period_ms: Option<u64>,

    /// Log level
    #[arg(long, env = "STRAWBERRY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "STRAWBERRY_LOG_JSON")]
    json: bool,

    /// Seed a `sleep` alias node under the root (repeatable)
    #[arg(long = "alias", value_name = "NAME")]
    aliases: Vec<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.level.clone().into());

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Override with CLI args
    if let Some(root) = cli.root {
        config.agent.root = root;
    }
    if let Some(period) = cli.pass_period_ms {
        config.agent.pass_period_ms = period;
    }
    if let Some(period) = cli.revision_collect_period_ms {
        config.agent.revision_collect_period_ms = period;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    init_tracing(&config.logging);

    let tree = InMemoryTreeStore::new();
    for alias in &cli.aliases {
        let revision = tree
            .create_node(
                &child_path(&config.agent.root, alias),
                SLEEP_FAMILY,
                serde_json::json!({}),
            )
            .await;
        tracing::info!(alias = %alias, %revision, "Seeded alias node");
    }

    let controllers =
        ControllerRegistry::new().with_controller(Arc::new(SleepController::new()));

    // Print startup banner
    println!(
        r#"
  Strawberry - alias reconciliation agent
  Version: {}
  Root: {}
  Pass period: {}ms
"#,
        env!("CARGO_PKG_VERSION"),
        config.agent.root,
        config.agent.pass_period_ms
    );

    let daemon = Daemon::new(
        config,
        Arc::new(tree),
        Arc::new(InMemoryCluster::new()),
        controllers,
    )
    .context("Failed to create daemon")?;

    daemon.run().await.context("Daemon failed")
}
