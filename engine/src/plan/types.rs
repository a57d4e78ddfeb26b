//! Plan tree data model
//!
//! Trees and nodes are persisted as flat records keyed by id with a
//! `parent_id` back-reference; the hierarchical view is reconstructed from
//! the flat list when needed, so the storage layer never holds a cyclic
//! object graph.

use sdk::types::{NodeKind, PlanNodeRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Aggregate status of a plan tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TreeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TreeStatus::Pending => "pending",
            TreeStatus::Running => "running",
            TreeStatus::Completed => "completed",
            TreeStatus::Failed => "failed",
            TreeStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(raw: &str) -> Self {
        match raw {
            "pending" => TreeStatus::Pending,
            "running" => TreeStatus::Running,
            "completed" => TreeStatus::Completed,
            "cancelled" => TreeStatus::Cancelled,
            _ => TreeStatus::Failed,
        }
    }

    /// Whether the tree reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TreeStatus::Completed | TreeStatus::Failed | TreeStatus::Cancelled
        )
    }
}

/// Status of one plan node
///
/// Transitions are monotonic along pending → ready → running → terminal;
/// the only backward edge is running → ready, used for stall recovery and
/// skipped expansions. A node never re-enters pending once scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Ready => "ready",
            NodeStatus::Running => "running",
            NodeStatus::Done => "done",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(raw: &str) -> Self {
        match raw {
            "pending" => NodeStatus::Pending,
            "ready" => NodeStatus::Ready,
            "running" => NodeStatus::Running,
            "done" => NodeStatus::Done,
            "skipped" => NodeStatus::Skipped,
            _ => NodeStatus::Failed,
        }
    }

    /// Whether the node reached a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Done | NodeStatus::Failed | NodeStatus::Skipped)
    }

    /// Whether `next` is a legal transition from this status
    pub fn may_transition(&self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Pending, Ready) | (Ready, Running) | (Running, Done) | (Running, Failed)
                | (Running, Skipped)
                // Stall recovery and skipped expansions re-queue the node
                | (Running, Ready)
        )
    }
}

/// One plan tree record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTree {
    pub id: String,
    pub goal: String,
    pub domain: String,
    pub status: TreeStatus,
    pub metadata: Value,
    pub root_id: String,
    /// Compacted out of the active working set; history is preserved
    pub archived: bool,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
}

/// One plan node record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub id: String,
    pub tree_id: String,
    pub parent_id: Option<String>,
    pub label: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub payload: Value,
    pub result: Option<Value>,
    /// Explicit priority; `None` defers to the owning chief's estimate
    pub priority: Option<f64>,
    /// Insertion order within the tree, used as the final scheduling
    /// tie-break
    pub seq: i64,
    pub retries: u32,
    pub created_at: i64,
    /// When the node last became ready; age basis for fair scheduling
    pub ready_at: Option<i64>,
    /// When the node last started running; stall detection basis
    pub running_since: Option<i64>,
    pub updated_at: i64,
}

impl PlanNode {
    /// The flattened view handed to chief plan callbacks
    pub fn to_ref(&self) -> PlanNodeRef {
        PlanNodeRef {
            id: self.id.clone(),
            tree_id: self.tree_id.clone(),
            label: self.label.clone(),
            payload: self.payload.clone(),
            retries: self.retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips() {
        for status in [
            TreeStatus::Pending,
            TreeStatus::Running,
            TreeStatus::Completed,
            TreeStatus::Failed,
            TreeStatus::Cancelled,
        ] {
            assert_eq!(TreeStatus::from_str(status.as_str()), status);
        }

        for status in [
            NodeStatus::Pending,
            NodeStatus::Ready,
            NodeStatus::Running,
            NodeStatus::Done,
            NodeStatus::Failed,
            NodeStatus::Skipped,
        ] {
            assert_eq!(NodeStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!NodeStatus::Pending.is_terminal());
        assert!(!NodeStatus::Ready.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
        assert!(NodeStatus::Done.is_terminal());
        assert!(NodeStatus::Failed.is_terminal());
        assert!(NodeStatus::Skipped.is_terminal());

        assert!(TreeStatus::Completed.is_terminal());
        assert!(!TreeStatus::Running.is_terminal());
    }

    #[test]
    fn test_legal_transitions() {
        use NodeStatus::*;
        assert!(Pending.may_transition(Ready));
        assert!(Ready.may_transition(Running));
        assert!(Running.may_transition(Done));
        assert!(Running.may_transition(Failed));
        assert!(Running.may_transition(Skipped));
        assert!(Running.may_transition(Ready));
    }

    #[test]
    fn test_no_reentry_into_pending() {
        use NodeStatus::*;
        for status in [Ready, Running, Done, Failed, Skipped] {
            assert!(!status.may_transition(Pending));
        }
        // Terminal statuses go nowhere
        for terminal in [Done, Failed, Skipped] {
            for next in [Pending, Ready, Running, Done, Failed, Skipped] {
                assert!(!terminal.may_transition(next));
            }
        }
    }
}
