//! In-memory tree store implementation

use super::{NodeRead, TreeStore, FAMILY_ATTRIBUTE, SPECLET_ATTRIBUTE};
use crate::error::{TreeError, TreeResult};
use crate::fault::FaultInjector;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use strawberry_types::Revision;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct MemoryNode {
    attributes: HashMap<String, serde_json::Value>,
    revision: Revision,
}

/// In-memory tree for development and testing
///
/// Every family or speclet write takes the next value of a store-wide
/// counter as the node's revision, so revisions only grow.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTreeStore {
    nodes: Arc<RwLock<BTreeMap<String, MemoryNode>>>,
    revisions: Arc<AtomicU64>,
    failing_lists: FaultInjector,
    failing_reads: FaultInjector,
    failing_writes: FaultInjector,
}

impl InMemoryTreeStore {
    /// Create a new empty tree
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> Revision {
        Revision::new(self.revisions.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Create (or replace) an alias node with the given family and speclet
    pub async fn create_node(
        &self,
        path: &str,
        family: &str,
        speclet: serde_json::Value,
    ) -> Revision {
        let attributes = HashMap::from([
            (FAMILY_ATTRIBUTE.to_string(), serde_json::json!(family)),
            (SPECLET_ATTRIBUTE.to_string(), speclet),
        ]);
        self.create_node_with_attributes(path, attributes).await
    }

    /// Create (or replace) a node with arbitrary attributes
    pub async fn create_node_with_attributes(
        &self,
        path: &str,
        attributes: HashMap<String, serde_json::Value>,
    ) -> Revision {
        let revision = self.next_revision();
        let mut nodes = self.nodes.write().await;
        nodes.insert(
            normalize(path).to_string(),
            MemoryNode {
                attributes,
                revision,
            },
        );
        revision
    }

    /// Remove a node and everything below it
    pub async fn remove_node(&self, path: &str) -> bool {
        let path = normalize(path);
        let prefix = format!("{}/", path);
        let mut nodes = self.nodes.write().await;
        let before = nodes.len();
        nodes.retain(|key, _| key != path && !key.starts_with(&prefix));
        nodes.len() != before
    }

    /// Replace the speclet of an existing node, returning the new revision
    pub async fn set_speclet(&self, path: &str, speclet: serde_json::Value) -> TreeResult<Revision> {
        self.write_attribute(path, SPECLET_ATTRIBUTE, speclet).await
    }

    /// Read one attribute, if the node and attribute exist
    pub async fn get_attribute(&self, path: &str, name: &str) -> Option<serde_json::Value> {
        let nodes = self.nodes.read().await;
        nodes
            .get(normalize(path))
            .and_then(|node| node.attributes.get(name).cloned())
    }

    /// Make the next `count` child listings fail with a transient error
    pub fn fail_next_lists(&self, count: u32) {
        self.failing_lists.arm(count);
    }

    /// Make the next `count` node reads fail with a transient error
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.arm(count);
    }

    /// Make the next `count` attribute writes fail with a transient error
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.arm(count);
    }

    async fn write_attribute(
        &self,
        path: &str,
        name: &str,
        value: serde_json::Value,
    ) -> TreeResult<Revision> {
        if self.failing_writes.trip() {
            return Err(TreeError::Transient(format!("injected write failure for {}", path)));
        }

        let bumps_revision = name == FAMILY_ATTRIBUTE || name == SPECLET_ATTRIBUTE;
        let revision = bumps_revision.then(|| self.next_revision());

        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(normalize(path))
            .ok_or_else(|| TreeError::NotFound(path.to_string()))?;

        node.attributes.insert(name.to_string(), value);
        if let Some(revision) = revision {
            node.revision = revision;
        }
        Ok(node.revision)
    }
}

#[async_trait]
impl TreeStore for InMemoryTreeStore {
    async fn list_children(&self, path: &str) -> TreeResult<Vec<String>> {
        if self.failing_lists.trip() {
            return Err(TreeError::Transient(format!("injected list failure for {}", path)));
        }

        let prefix = format!("{}/", normalize(path));
        let nodes = self.nodes.read().await;
        Ok(nodes
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn read_node(&self, path: &str, attributes: &[&str]) -> TreeResult<NodeRead> {
        if self.failing_reads.trip() {
            return Err(TreeError::Transient(format!("injected read failure for {}", path)));
        }

        let nodes = self.nodes.read().await;
        let node = nodes
            .get(normalize(path))
            .ok_or_else(|| TreeError::NotFound(path.to_string()))?;

        Ok(NodeRead {
            attributes: attributes
                .iter()
                .filter_map(|name| {
                    node.attributes
                        .get(*name)
                        .map(|value| (name.to_string(), value.clone()))
                })
                .collect(),
            revision: node.revision,
        })
    }

    async fn set_attribute(
        &self,
        path: &str,
        name: &str,
        value: serde_json::Value,
    ) -> TreeResult<()> {
        self.write_attribute(path, name, value).await.map(|_| ())
    }
}

fn normalize(path: &str) -> &str {
    path.trim_end_matches('/')
}
