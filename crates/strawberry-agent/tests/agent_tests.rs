//! End-to-end agent scenarios against the in-memory backends

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strawberry_agent::tree::{child_path, STATUS_ATTRIBUTE};
use strawberry_agent::{
    Agent, AgentConfig, AgentError, ControllerRegistry, InMemoryCluster, InMemoryTreeStore,
    SleepController,
};
use strawberry_types::{AgentEvent, Alias, AliasPhase, NodeStatus, Revision};
use tokio::time::{sleep, timeout, Instant};

const ROOT: &str = "//tmp/strawberry";

struct Env {
    tree: InMemoryTreeStore,
    cluster: InMemoryCluster,
    agent: Agent,
}

impl Env {
    fn new() -> Self {
        let tree = InMemoryTreeStore::new();
        let cluster = InMemoryCluster::new();
        let config = AgentConfig {
            root: ROOT.to_string(),
            pass_period_ms: 50,
            revision_collect_period_ms: 20,
            ..AgentConfig::default()
        };
        let agent = Agent::new(
            config,
            Arc::new(tree.clone()),
            Arc::new(cluster.clone()),
            ControllerRegistry::new().with_controller(Arc::new(SleepController::new())),
        )
        .unwrap();

        Self {
            tree,
            cluster,
            agent,
        }
    }

    async fn create(&self, alias: &str, speclet: serde_json::Value) -> Revision {
        self.tree
            .create_node(&child_path(ROOT, alias), "sleep", speclet)
            .await
    }

    async fn remove(&self, alias: &str) {
        self.tree.remove_node(&child_path(ROOT, alias)).await;
    }

    async fn status(&self, alias: &str) -> Option<NodeStatus> {
        let value = self
            .tree
            .get_attribute(&child_path(ROOT, alias), STATUS_ATTRIBUTE)
            .await?;
        serde_json::from_value(value).ok()
    }

    async fn wait_for_running(&self, expected: &[&str]) {
        let cluster = self.cluster.clone();
        let expected: Vec<String> = expected.iter().map(|alias| alias.to_string()).collect();
        let reached = eventually(|| {
            let cluster = cluster.clone();
            let expected = expected.clone();
            async move { cluster.running_aliases().await == expected }
        })
        .await;
        assert!(
            reached,
            "expected running aliases {:?}, got {:?}",
            expected,
            self.cluster.running_aliases().await
        );
    }
}

/// Poll `check` until it holds or five seconds pass
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_operation_before_start() {
    let env = Env::new();
    env.create("test", serde_json::json!({})).await;

    env.agent.start().await.unwrap();
    env.wait_for_running(&["test"]).await;
    env.agent.stop().await;
}

#[tokio::test]
async fn test_operation_after_start() {
    let env = Env::new();
    env.agent.start().await.unwrap();

    env.create("test", serde_json::json!({})).await;
    env.wait_for_running(&["test"]).await;
    env.agent.stop().await;
}

#[tokio::test]
async fn test_abort_dangling() {
    let env = Env::new();
    env.create("test1", serde_json::json!({})).await;
    env.agent.start().await.unwrap();
    env.wait_for_running(&["test1"]).await;

    env.remove("test1").await;
    env.create("test2", serde_json::json!({})).await;
    env.wait_for_running(&["test2"]).await;

    env.remove("test2").await;
    env.create("test1", serde_json::json!({})).await;
    env.wait_for_running(&["test1"]).await;

    env.remove("test1").await;
    env.wait_for_running(&[]).await;

    env.agent.stop().await;
}

#[tokio::test]
async fn test_speclet_change_restarts_job() {
    let env = Env::new();
    env.create("test", serde_json::json!({})).await;
    env.agent.start().await.unwrap();
    env.wait_for_running(&["test"]).await;

    // Sample the cluster while the restart happens
    let overlap = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let cluster = env.cluster.clone();
        let overlap = overlap.clone();
        let done = done.clone();
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                if cluster.live_jobs_for(&Alias::new("test")).await.len() > 1 {
                    overlap.store(true, Ordering::SeqCst);
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let revision = env
        .tree
        .set_speclet(&child_path(ROOT, "test"), serde_json::json!({"duration_secs": 600}))
        .await
        .unwrap();

    let cluster = env.cluster.clone();
    let restarted = eventually(|| {
        let cluster = cluster.clone();
        async move {
            let jobs = cluster.live_jobs_for(&Alias::new("test")).await;
            jobs.len() == 1 && jobs[0].revision == Some(revision)
        }
    })
    .await;

    done.store(true, Ordering::SeqCst);
    sampler.await.unwrap();
    env.agent.stop().await;

    assert!(restarted, "job was not restarted with the new revision");
    assert!(!overlap.load(Ordering::SeqCst), "two live jobs for one alias");
    assert_eq!(env.cluster.jobs().await.len(), 2);
}

#[tokio::test]
async fn test_invalid_speclet_is_parked_until_fixed() {
    let env = Env::new();
    env.create("test", serde_json::json!({"duration_secs": "forever"}))
        .await;
    env.agent.start().await.unwrap();

    let env_ref = &env;
    let parked = eventually(move || async move {
        env_ref
            .status("test")
            .await
            .is_some_and(|status| status.phase == AliasPhase::Failed && status.error.is_some())
    })
    .await;
    assert!(parked, "alias was not parked as failed");
    assert!(env.cluster.jobs().await.is_empty());

    env.tree
        .set_speclet(&child_path(ROOT, "test"), serde_json::json!({}))
        .await
        .unwrap();
    env.wait_for_running(&["test"]).await;

    let recovered = eventually(move || async move {
        env_ref
            .status("test")
            .await
            .is_some_and(|status| status.phase == AliasPhase::Running && status.error.is_none())
    })
    .await;
    env.agent.stop().await;
    assert!(recovered, "status did not recover");
}

#[tokio::test]
async fn test_restarted_agent_adopts_running_jobs() {
    let env = Env::new();
    env.create("test1", serde_json::json!({})).await;
    env.create("test2", serde_json::json!({})).await;

    env.agent.start().await.unwrap();
    env.wait_for_running(&["test1", "test2"]).await;
    env.agent.stop().await;
    assert!(!env.agent.is_running().await);

    let mut events = env.agent.subscribe_events();
    env.agent.start().await.unwrap();

    let adopted = timeout(Duration::from_secs(5), async {
        let mut adopted = 0;
        while adopted < 2 {
            if let Ok(envelope) = events.recv().await {
                if matches!(envelope.event, AgentEvent::JobAdopted { .. }) {
                    adopted += 1;
                }
            }
        }
    })
    .await;
    assert!(adopted.is_ok(), "running jobs were not adopted");

    // A few more passes must not start anything new
    sleep(Duration::from_millis(200)).await;
    env.agent.stop().await;

    assert_eq!(env.cluster.jobs().await.len(), 2);
    assert_eq!(env.cluster.running_aliases().await, vec!["test1", "test2"]);
}

#[tokio::test]
async fn test_job_crash_is_recovered() {
    let env = Env::new();
    env.create("test", serde_json::json!({})).await;
    env.agent.start().await.unwrap();
    env.wait_for_running(&["test"]).await;

    let crashed = env.cluster.live_jobs_for(&Alias::new("test")).await[0].id.clone();
    env.cluster
        .set_job_state(&crashed, strawberry_types::JobState::Failed)
        .await
        .unwrap();

    let cluster = env.cluster.clone();
    let replaced = eventually(|| {
        let cluster = cluster.clone();
        let crashed = crashed.clone();
        async move {
            let jobs = cluster.live_jobs_for(&Alias::new("test")).await;
            jobs.len() == 1 && jobs[0].id != crashed
        }
    })
    .await;
    env.agent.stop().await;
    assert!(replaced, "crashed job was not replaced");
}

#[test]
fn test_agent_without_controllers_is_rejected() {
    let result = Agent::new(
        AgentConfig::default(),
        Arc::new(InMemoryTreeStore::new()),
        Arc::new(InMemoryCluster::new()),
        ControllerRegistry::new(),
    );
    assert!(matches!(result, Err(AgentError::NoControllers)));
}
