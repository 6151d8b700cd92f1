//! Tree watcher: builds the desired-state snapshot
//!
//! Lists the children of the agent root and reads, for each of them, the
//! family tag and speclet together with the speclet revision in one read.
//! Nodes that exist but cannot be managed this time end up in
//! [`DesiredSnapshot::skipped`]; only nodes gone from the tree are left out.

use crate::controller::ControllerRegistry;
use crate::error::{TreeError, TreeResult};
use crate::tree::{child_path, TreeStore, FAMILY_ATTRIBUTE, SPECLET_ATTRIBUTE};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use strawberry_types::{Alias, DesiredEntry, DesiredSnapshot, Family, SkipReason, SkippedNode};
use tracing::{debug, instrument, warn};

/// Outcome of reading a single child node
enum NodeOutcome {
    Desired(DesiredEntry),
    Skipped(SkippedNode),
    Vanished,
}

/// Polls the tree under the configured root
#[derive(Clone)]
pub struct TreeWatcher {
    tree: Arc<dyn TreeStore>,
    controllers: Arc<ControllerRegistry>,
    root: String,
}

impl TreeWatcher {
    pub fn new(
        tree: Arc<dyn TreeStore>,
        controllers: Arc<ControllerRegistry>,
        root: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            controllers,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Collect the desired state of every alias under the root.
    ///
    /// Only a failure to list the root is an error; problems with single
    /// nodes are reported through [`DesiredSnapshot::skipped`] or ignored.
    #[instrument(skip(self), fields(root = %self.root))]
    pub async fn poll(&self) -> TreeResult<DesiredSnapshot> {
        let children = self.tree.list_children(&self.root).await?;

        let outcomes = join_all(children.into_iter().map(|name| self.read_child(name))).await;

        let mut entries = HashMap::new();
        let mut skipped = Vec::new();
        for outcome in outcomes {
            match outcome {
                NodeOutcome::Desired(entry) => {
                    entries.insert(entry.alias.clone(), entry);
                }
                NodeOutcome::Skipped(node) => {
                    warn!(alias = %node.alias, reason = %node.reason, "Skipping alias node");
                    skipped.push(node);
                }
                NodeOutcome::Vanished => {}
            }
        }

        debug!(
            aliases = entries.len(),
            skipped = skipped.len(),
            "Collected desired state"
        );

        Ok(DesiredSnapshot {
            entries,
            skipped,
            collected_at: chrono::Utc::now(),
        })
    }

    async fn read_child(&self, name: String) -> NodeOutcome {
        let alias = Alias::new(name);
        let path = child_path(&self.root, alias.as_str());

        let node = match self
            .tree
            .read_node(&path, &[FAMILY_ATTRIBUTE, SPECLET_ATTRIBUTE])
            .await
        {
            Ok(node) => node,
            // Removed between listing and reading
            Err(TreeError::NotFound(_)) => return NodeOutcome::Vanished,
            // Still listed, so the node exists; its job must be left alone
            Err(e) => {
                warn!(alias = %alias, error = %e, "Failed to read alias node");
                return skip(alias, SkipReason::Unreadable);
            }
        };

        let family = match node.attribute(FAMILY_ATTRIBUTE) {
            None => return skip(alias, SkipReason::MissingFamily),
            Some(serde_json::Value::String(family)) => Family::new(family.as_str()),
            Some(_) => return skip(alias, SkipReason::InvalidFamily),
        };

        if !self.controllers.contains(family.as_str()) {
            return skip(alias, SkipReason::UnknownFamily(family));
        }

        let speclet = node
            .attribute(SPECLET_ATTRIBUTE)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));

        NodeOutcome::Desired(DesiredEntry {
            alias,
            family,
            revision: node.revision,
            speclet,
        })
    }
}

fn skip(alias: Alias, reason: SkipReason) -> NodeOutcome {
    NodeOutcome::Skipped(SkippedNode { alias, reason })
}
