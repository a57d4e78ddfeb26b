//! Plan persistence operations
//!
//! SQLite implementation of the plan store boundary. Trees and nodes are
//! flat rows keyed by id; the hierarchy is only the `parent_id` column.
//! All queries are parameterized.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{NodeKind, NodeSeed};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::plan::store::{root_payload, PlanStore};
use crate::plan::types::{now_ms, NodeStatus, PlanNode, PlanTree, TreeStatus};

fn kind_as_str(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Composite => "composite",
        NodeKind::Leaf => "leaf",
    }
}

fn kind_from_str(raw: &str) -> NodeKind {
    match raw {
        "composite" => NodeKind::Composite,
        _ => NodeKind::Leaf,
    }
}

fn json_from_column(raw: Option<String>) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

fn json_to_column(value: &Value) -> String {
    value.to_string()
}

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::Database(e.to_string())
}

fn tree_from_row(row: &SqliteRow) -> PlanTree {
    PlanTree {
        id: row.get("id"),
        goal: row.get("goal"),
        domain: row.get("domain"),
        status: TreeStatus::from_str(row.get::<String, _>("status").as_str()),
        metadata: json_from_column(row.get("metadata")),
        root_id: row.get("root_id"),
        archived: row.get::<i64, _>("archived") != 0,
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error: row.get("error"),
    }
}

fn node_from_row(row: &SqliteRow) -> PlanNode {
    PlanNode {
        id: row.get("id"),
        tree_id: row.get("tree_id"),
        parent_id: row.get("parent_id"),
        label: row.get("label"),
        kind: kind_from_str(row.get::<String, _>("kind").as_str()),
        status: NodeStatus::from_str(row.get::<String, _>("status").as_str()),
        payload: json_from_column(row.get("payload")),
        result: row
            .get::<Option<String>, _>("result")
            .and_then(|s| serde_json::from_str(&s).ok()),
        priority: row.get("priority"),
        seq: row.get("seq"),
        retries: row.get::<i64, _>("retries") as u32,
        created_at: row.get("created_at"),
        ready_at: row.get("ready_at"),
        running_since: row.get("running_since"),
        updated_at: row.get("updated_at"),
    }
}

const NODE_COLUMNS: &str = "id, tree_id, parent_id, label, kind, status, payload, result, \
     priority, seq, retries, created_at, ready_at, running_since, updated_at";

const TREE_COLUMNS: &str = "id, goal, domain, status, metadata, root_id, archived, created_at, \
     started_at, completed_at, error";

/// Plan store backed by SQLite
pub struct SqlitePlanStore {
    pool: SqlitePool,
}

impl SqlitePlanStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_node(&self, node: &PlanNode) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO plan_nodes (id, tree_id, parent_id, label, kind, status, payload, \
             result, priority, seq, retries, created_at, ready_at, running_since, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&node.id)
        .bind(&node.tree_id)
        .bind(&node.parent_id)
        .bind(&node.label)
        .bind(kind_as_str(node.kind))
        .bind(node.status.as_str())
        .bind(json_to_column(&node.payload))
        .bind(node.result.as_ref().map(json_to_column))
        .bind(node.priority)
        .bind(node.seq)
        .bind(node.retries as i64)
        .bind(node.created_at)
        .bind(node.ready_at)
        .bind(node.running_since)
        .bind(node.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn next_seq(&self, tree_id: &str) -> Result<i64, EngineError> {
        let seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), -1) + 1 FROM plan_nodes WHERE tree_id = ?")
                .bind(tree_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(seq)
    }

    /// Most recently created trees, newest first (CLI surface)
    pub async fn recent_trees(&self, limit: i64) -> Result<Vec<PlanTree>, EngineError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM plan_trees ORDER BY created_at DESC, id DESC LIMIT ?",
            TREE_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(tree_from_row).collect())
    }
}

#[async_trait]
impl PlanStore for SqlitePlanStore {
    async fn create_tree(
        &self,
        goal: &str,
        domain: &str,
        metadata: Value,
    ) -> Result<PlanTree, EngineError> {
        let now = now_ms();
        let tree_id = Uuid::new_v4().to_string();
        let root_id = Uuid::new_v4().to_string();

        let tree = PlanTree {
            id: tree_id.clone(),
            goal: goal.to_string(),
            domain: domain.to_string(),
            status: TreeStatus::Pending,
            metadata,
            root_id: root_id.clone(),
            archived: false,
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
        };

        sqlx::query(
            "INSERT INTO plan_trees (id, goal, domain, status, metadata, root_id, archived, \
             created_at, started_at, completed_at, error) VALUES (?, ?, ?, ?, ?, ?, 0, ?, NULL, NULL, NULL)",
        )
        .bind(&tree.id)
        .bind(&tree.goal)
        .bind(&tree.domain)
        .bind(tree.status.as_str())
        .bind(json_to_column(&tree.metadata))
        .bind(&tree.root_id)
        .bind(tree.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let root = PlanNode {
            id: root_id,
            tree_id,
            parent_id: None,
            label: goal.to_string(),
            kind: NodeKind::Composite,
            status: NodeStatus::Pending,
            payload: root_payload(goal, &tree.metadata),
            result: None,
            priority: None,
            seq: 0,
            retries: 0,
            created_at: now,
            ready_at: None,
            running_since: None,
            updated_at: now,
        };
        self.insert_node(&root).await?;

        Ok(tree)
    }

    async fn create_node(
        &self,
        tree_id: &str,
        parent_id: &str,
        seed: &NodeSeed,
    ) -> Result<PlanNode, EngineError> {
        let parent = self
            .node(parent_id)
            .await?
            .ok_or_else(|| EngineError::PlanNotFound(parent_id.to_string()))?;
        if parent.tree_id != tree_id {
            return Err(EngineError::Storage(format!(
                "parent {} belongs to a different tree",
                parent_id
            )));
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
            seq: self.next_seq(tree_id).await?,
            retries: 0,
            created_at: now,
            ready_at: None,
            running_since: None,
            updated_at: now,
        };
        self.insert_node(&node).await?;
        Ok(node)
    }

    async fn update_node(&self, node: &PlanNode) -> Result<(), EngineError> {
        let affected = sqlx::query(
            "UPDATE plan_nodes SET label = ?, kind = ?, status = ?, payload = ?, result = ?, \
             priority = ?, retries = ?, ready_at = ?, running_since = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&node.label)
        .bind(kind_as_str(node.kind))
        .bind(node.status.as_str())
        .bind(json_to_column(&node.payload))
        .bind(node.result.as_ref().map(json_to_column))
        .bind(node.priority)
        .bind(node.retries as i64)
        .bind(node.ready_at)
        .bind(node.running_since)
        .bind(node.updated_at)
        .bind(&node.id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if affected == 0 {
            return Err(EngineError::PlanNotFound(node.id.clone()));
        }
        Ok(())
    }

    async fn update_tree(&self, tree: &PlanTree) -> Result<(), EngineError> {
        let affected = sqlx::query(
            "UPDATE plan_trees SET status = ?, metadata = ?, archived = ?, started_at = ?, \
             completed_at = ?, error = ? WHERE id = ?",
        )
        .bind(tree.status.as_str())
        .bind(json_to_column(&tree.metadata))
        .bind(tree.archived as i64)
        .bind(tree.started_at)
        .bind(tree.completed_at)
        .bind(&tree.error)
        .bind(&tree.id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if affected == 0 {
            return Err(EngineError::PlanNotFound(tree.id.clone()));
        }
        Ok(())
    }

    async fn node(&self, id: &str) -> Result<Option<PlanNode>, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM plan_nodes WHERE id = ?",
            NODE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.as_ref().map(node_from_row))
    }

    async fn tree(&self, id: &str) -> Result<Option<PlanTree>, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM plan_trees WHERE id = ?",
            TREE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.as_ref().map(tree_from_row))
    }

    async fn children(&self, parent_id: &str) -> Result<Vec<PlanNode>, EngineError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM plan_nodes WHERE parent_id = ? ORDER BY seq ASC",
            NODE_COLUMNS
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    async fn nodes_for_tree(&self, tree_id: &str) -> Result<Vec<PlanNode>, EngineError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM plan_nodes WHERE tree_id = ? ORDER BY seq ASC",
            NODE_COLUMNS
        ))
        .bind(tree_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(node_from_row).collect())
    }

    async fn active_trees(&self) -> Result<Vec<PlanTree>, EngineError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM plan_trees WHERE archived = 0 ORDER BY created_at ASC, id ASC",
            TREE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(tree_from_row).collect())
    }
}
