//! Metadata tree boundary
//!
//! The agent reads alias nodes from a hierarchical tree store and writes a
//! status attribute back to them. Paths use `/` as separator.

mod memory;

pub use memory::InMemoryTreeStore;

use crate::error::TreeResult;
use async_trait::async_trait;
use std::collections::HashMap;
use strawberry_types::Revision;

/// Attribute naming the family of an alias node
pub const FAMILY_ATTRIBUTE: &str = "strawberry_family";

/// Attribute holding the family-defined speclet
pub const SPECLET_ATTRIBUTE: &str = "strawberry_speclet";

/// Attribute the agent writes its status to
pub const STATUS_ATTRIBUTE: &str = "strawberry_persistent_state";

/// Attributes of one node read at a single point in time
#[derive(Debug, Clone, Default)]
pub struct NodeRead {
    /// Requested attributes that exist on the node
    pub attributes: HashMap<String, serde_json::Value>,

    /// Revision of the node's speclet
    pub revision: Revision,
}

impl NodeRead {
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }
}

/// Tree store operations needed by the agent
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Names of the immediate children of `path`
    async fn list_children(&self, path: &str) -> TreeResult<Vec<String>>;

    /// Read `attributes` and the speclet revision in one consistent read
    async fn read_node(&self, path: &str, attributes: &[&str]) -> TreeResult<NodeRead>;

    /// Set a single attribute on an existing node
    async fn set_attribute(
        &self,
        path: &str,
        name: &str,
        value: serde_json::Value,
    ) -> TreeResult<()>;
}

/// Path of the child `name` under `parent`.
pub fn child_path(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("//sys/strawberry", "test"), "//sys/strawberry/test");
        assert_eq!(child_path("//sys/strawberry/", "test"), "//sys/strawberry/test");
    }
}
