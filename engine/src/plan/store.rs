//! Plan persistence boundary
//!
//! The scheduling engine needs only this minimal surface from a store:
//! create trees and nodes, update them, list ordered children, fetch by id,
//! and sweep the active working set. Two implementations ship with the
//! engine: the in-memory store below (tests, embedders with their own
//! durability) and the SQLite store in [`crate::db::plans`].

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{NodeKind, NodeSeed};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use uuid::Uuid;

use super::types::{now_ms, NodeStatus, PlanNode, PlanTree, TreeStatus};

/// Storage boundary for plan trees and nodes
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Create a tree with its root node
    ///
    /// The root is a composite carrying `metadata` (when it is an object)
    /// with the goal inserted under `"goal"`, so expansion callbacks see
    /// the full mission payload.
    async fn create_tree(
        &self,
        goal: &str,
        domain: &str,
        metadata: Value,
    ) -> Result<PlanTree, EngineError>;

    /// Insert a child node under a parent
    async fn create_node(
        &self,
        tree_id: &str,
        parent_id: &str,
        seed: &NodeSeed,
    ) -> Result<PlanNode, EngineError>;

    /// Persist a full node record
    async fn update_node(&self, node: &PlanNode) -> Result<(), EngineError>;

    /// Persist a full tree record
    async fn update_tree(&self, tree: &PlanTree) -> Result<(), EngineError>;

    /// Fetch a node by id
    async fn node(&self, id: &str) -> Result<Option<PlanNode>, EngineError>;

    /// Fetch a tree by id
    async fn tree(&self, id: &str) -> Result<Option<PlanTree>, EngineError>;

    /// Ordered children of a node (insertion order)
    async fn children(&self, parent_id: &str) -> Result<Vec<PlanNode>, EngineError>;

    /// All nodes of a tree in insertion order
    async fn nodes_for_tree(&self, tree_id: &str) -> Result<Vec<PlanNode>, EngineError>;

    /// Trees still in the active working set (not compacted)
    async fn active_trees(&self) -> Result<Vec<PlanTree>, EngineError>;
}

/// Build the root payload for a new tree
pub(crate) fn root_payload(goal: &str, metadata: &Value) -> Value {
    let mut payload = match metadata {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    payload.insert("goal".to_string(), Value::String(goal.to_string()));
    Value::Object(payload)
}

/// In-memory plan store
///
/// Flat arenas keyed by id, guarded by one RwLock each. Insertion order is
/// tracked with a global sequence counter.
#[derive(Default)]
pub struct MemoryPlanStore {
    trees: RwLock<HashMap<String, PlanTree>>,
    nodes: RwLock<HashMap<String, PlanNode>>,
    seq: AtomicI64,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn lock_poisoned() -> EngineError {
        EngineError::Storage("plan store lock poisoned".to_string())
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn create_tree(
        &self,
        goal: &str,
        domain: &str,
        metadata: Value,
    ) -> Result<PlanTree, EngineError> {
        let now = now_ms();
        let tree_id = Uuid::new_v4().to_string();
        let root_id = Uuid::new_v4().to_string();

        let root = PlanNode {
            id: root_id.clone(),
            tree_id: tree_id.clone(),
            parent_id: None,
            label: goal.to_string(),
            kind: NodeKind::Composite,
            status: NodeStatus::Pending,
            payload: root_payload(goal, &metadata),
            result: None,
            priority: None,
            seq: self.next_seq(),
            retries: 0,
            created_at: now,
            ready_at: None,
            running_since: None,
            updated_at: now,
        };

        let tree = PlanTree {
            id: tree_id.clone(),
            goal: goal.to_string(),
            domain: domain.to_string(),
            status: TreeStatus::Pending,
            metadata,
            root_id,
            archived: false,
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
        };

        self.nodes
            .write()
            .map_err(|_| Self::lock_poisoned())?
            .insert(root.id.clone(), root);
        self.trees
            .write()
            .map_err(|_| Self::lock_poisoned())?
            .insert(tree_id, tree.clone());

        Ok(tree)
    }

    async fn create_node(
        &self,
        tree_id: &str,
        parent_id: &str,
        seed: &NodeSeed,
    ) -> Result<PlanNode, EngineError> {
        {
            let nodes = self.nodes.read().map_err(|_| Self::lock_poisoned())?;
            let parent = nodes
                .get(parent_id)
                .ok_or_else(|| EngineError::PlanNotFound(parent_id.to_string()))?;
            if parent.tree_id != tree_id {
                return Err(EngineError::Storage(format!(
                    "parent {} belongs to a different tree",
                    parent_id
                )));
            }
        }

        let now = now_ms();
        let node = PlanNode {
            id: Uuid::new_v4().to_string(),
            tree_id: tree_id.to_string(),
            parent_id: Some(parent_id.to_string()),
            label: seed.label.clone(),
            kind: seed.kind,
            status: NodeStatus::Pending,
            payload: seed.payload.clone(),
            result: None,
            priority: seed.priority,
            seq: self.next_seq(),
            retries: 0,
            created_at: now,
            ready_at: None,
            running_since: None,
            updated_at: now,
        };

        self.nodes
            .write()
            .map_err(|_| Self::lock_poisoned())?
            .insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn update_node(&self, node: &PlanNode) -> Result<(), EngineError> {
        let mut nodes = self.nodes.write().map_err(|_| Self::lock_poisoned())?;
        if !nodes.contains_key(&node.id) {
            return Err(EngineError::PlanNotFound(node.id.clone()));
        }
        nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn update_tree(&self, tree: &PlanTree) -> Result<(), EngineError> {
        let mut trees = self.trees.write().map_err(|_| Self::lock_poisoned())?;
        if !trees.contains_key(&tree.id) {
            return Err(EngineError::PlanNotFound(tree.id.clone()));
        }
        trees.insert(tree.id.clone(), tree.clone());
        Ok(())
    }

    async fn node(&self, id: &str) -> Result<Option<PlanNode>, EngineError> {
        Ok(self
            .nodes
            .read()
            .map_err(|_| Self::lock_poisoned())?
            .get(id)
            .cloned())
    }

    async fn tree(&self, id: &str) -> Result<Option<PlanTree>, EngineError> {
        Ok(self
            .trees
            .read()
            .map_err(|_| Self::lock_poisoned())?
            .get(id)
            .cloned())
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<PlanNode>, EngineError> {
        let nodes = self.nodes.read().map_err(|_| Self::lock_poisoned())?;
        let mut children: Vec<PlanNode> = nodes
            .values()
            .filter(|n| n.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by_key(|n| n.seq);
        Ok(children)
    }

    async fn nodes_for_tree(&self, tree_id: &str) -> Result<Vec<PlanNode>, EngineError> {
        let nodes = self.nodes.read().map_err(|_| Self::lock_poisoned())?;
        let mut all: Vec<PlanNode> = nodes
            .values()
            .filter(|n| n.tree_id == tree_id)
            .cloned()
            .collect();
        all.sort_by_key(|n| n.seq);
        Ok(all)
    }

    async fn active_trees(&self) -> Result<Vec<PlanTree>, EngineError> {
        let trees = self.trees.read().map_err(|_| Self::lock_poisoned())?;
        let mut active: Vec<PlanTree> = trees.values().filter(|t| !t.archived).cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_tree_with_root() {
        let store = MemoryPlanStore::new();
        let tree = store
            .create_tree("demo", "mission", json!({"tasks": ["a", "b"]}))
            .await
            .unwrap();

        assert_eq!(tree.status, TreeStatus::Pending);
        assert!(!tree.archived);

        let root = store.node(&tree.root_id).await.unwrap().unwrap();
        assert_eq!(root.parent_id, None);
        assert_eq!(root.kind, NodeKind::Composite);
        assert_eq!(root.status, NodeStatus::Pending);
        assert_eq!(root.payload["goal"], "demo");
        assert_eq!(root.payload["tasks"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_children_are_insertion_ordered() {
        let store = MemoryPlanStore::new();
        let tree = store.create_tree("demo", "mission", Value::Null).await.unwrap();

        for label in ["first", "second", "third"] {
            store
                .create_node(&tree.id, &tree.root_id, &NodeSeed::leaf(label, Value::Null))
                .await
                .unwrap();
        }

        let children = store.children(&tree.root_id).await.unwrap();
        let labels: Vec<&str> = children.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_create_node_requires_existing_parent() {
        let store = MemoryPlanStore::new();
        let tree = store.create_tree("demo", "mission", Value::Null).await.unwrap();

        let err = store
            .create_node(&tree.id, "no-such-node", &NodeSeed::leaf("x", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PlanNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_round_trip() {
        let store = MemoryPlanStore::new();
        let mut tree = store.create_tree("demo", "mission", Value::Null).await.unwrap();
        let mut root = store.node(&tree.root_id).await.unwrap().unwrap();

        root.status = NodeStatus::Ready;
        root.ready_at = Some(now_ms());
        store.update_node(&root).await.unwrap();

        tree.status = TreeStatus::Running;
        tree.started_at = Some(now_ms());
        store.update_tree(&tree).await.unwrap();

        assert_eq!(
            store.node(&root.id).await.unwrap().unwrap().status,
            NodeStatus::Ready
        );
        assert_eq!(
            store.tree(&tree.id).await.unwrap().unwrap().status,
            TreeStatus::Running
        );
    }

    #[tokio::test]
    async fn test_archived_trees_leave_active_set() {
        let store = MemoryPlanStore::new();
        let mut tree = store.create_tree("demo", "mission", Value::Null).await.unwrap();
        assert_eq!(store.active_trees().await.unwrap().len(), 1);

        tree.archived = true;
        store.update_tree(&tree).await.unwrap();
        assert!(store.active_trees().await.unwrap().is_empty());

        // History is preserved
        assert!(store.tree(&tree.id).await.unwrap().is_some());
    }
}
