//! Plan tree scheduling engine
//!
//! Runs one deterministic scheduling pass per invocation, inside the
//! owning chief's turn:
//!
//! 1. Stall sweep: nodes running past the stall timeout are reset to ready
//!    (retry) or failed once retries are exhausted. Recovery precedes any
//!    new work in the same pass.
//! 2. Ready-set recompute from current statuses across all active trees;
//!    nothing is cached between passes.
//! 3. Ordering by descending priority, then oldest-ready-first, then
//!    insertion order — a stable, documented tie-break so scheduling is
//!    reproducible given the same inputs.
//! 4. Up to `parallelism` nodes execute: composites expand into children,
//!    leaves perform their step.
//! 5. Aggregation: a composite whose children are all terminal becomes
//!    done (or failed if any child failed); a terminal root finishes the
//!    tree. A failed leaf never interrupts running siblings — failure
//!    surfaces only at aggregation time.
//! 6. Compaction: trees terminal for longer than the retention window are
//!    archived out of the active set; their history stays in the store.

use sdk::chief::Chief;
use sdk::context::DomainContext;
use sdk::errors::EngineError;
use sdk::types::{Action, Expansion, FeatureMap, NodeKind, StepStatus, TrajectoryStep};
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::{EngineEvent, EventBus};
use crate::config::PlanConfig;
use crate::trajectory::TrajectorySink;

use super::store::PlanStore;
use super::types::{now_ms, NodeStatus, PlanNode, PlanTree, TreeStatus};

/// One action taken during a scheduling pass, in execution order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassAction {
    /// A stalled node was reset to ready for retry
    RecoverStalled { node: String, retries: u32 },
    /// A stalled node exhausted its retries and failed
    StallExhausted { node: String },
    /// A composite expanded into children
    Expand { node: String, children: usize },
    /// A composite skipped expansion and became a de-facto leaf
    ExpandSkipped { node: String },
    /// A composite failed to expand
    ExpandFailed { node: String },
    /// A leaf performed its step
    Perform { node: String, status: StepStatus },
    /// A leaf's step call errored
    StepFailed { node: String },
    /// A terminal tree left the active working set
    Compact { tree: String },
}

/// Summary of one scheduling pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    /// Everything the pass did, in order
    pub actions: Vec<PassAction>,

    /// Trees that reached completed this pass
    pub completed_trees: Vec<String>,

    /// Trees that reached failed this pass
    pub failed_trees: Vec<String>,
}

impl PassReport {
    pub fn recovered(&self) -> u64 {
        self.actions
            .iter()
            .filter(|a| matches!(a, PassAction::RecoverStalled { .. }))
            .count() as u64
    }

    pub fn performed(&self) -> u64 {
        self.actions
            .iter()
            .filter(|a| matches!(a, PassAction::Perform { .. }))
            .count() as u64
    }

    pub fn failures(&self) -> u64 {
        self.actions
            .iter()
            .filter(|a| {
                matches!(
                    a,
                    PassAction::StepFailed { .. }
                        | PassAction::ExpandFailed { .. }
                        | PassAction::StallExhausted { .. }
                        | PassAction::Perform {
                            status: StepStatus::Failed,
                            ..
                        }
                )
            })
            .count() as u64
    }

    /// Compact JSON summary, written into the owning chief's context
    pub fn summary(&self) -> Value {
        json!({
            "actions": self.actions.len(),
            "recovered": self.recovered(),
            "performed": self.performed(),
            "failures": self.failures(),
            "completed_trees": self.completed_trees.len(),
            "failed_trees": self.failed_trees.len(),
        })
    }
}

/// The scheduling engine
///
/// Holds the store boundary and scheduling limits; all tree state lives in
/// the store, recomputed fresh each pass.
pub struct PlanEngine {
    store: Arc<dyn PlanStore>,
    parallelism: usize,
    stall_timeout_ms: i64,
    max_retries: u32,
    retention_ms: i64,
    sink: Option<Arc<dyn TrajectorySink>>,
    bus: Option<EventBus>,
}

impl PlanEngine {
    pub fn new(store: Arc<dyn PlanStore>, config: &PlanConfig) -> Self {
        Self {
            store,
            parallelism: config.parallelism.max(1),
            stall_timeout_ms: (config.stall_timeout_secs as i64) * 1000,
            max_retries: config.max_retries,
            retention_ms: (config.retention_secs as i64) * 1000,
            sink: None,
            bus: None,
        }
    }

    /// Also record one trajectory step per node completion
    pub fn with_sink(mut self, sink: Arc<dyn TrajectorySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Also publish stall recoveries and tree completions as bus events
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// The store this engine schedules against
    pub fn store(&self) -> &Arc<dyn PlanStore> {
        &self.store
    }

    /// Run one scheduling pass on behalf of `chief`
    pub async fn advance(
        &self,
        chief: &dyn Chief,
        ctx: &mut DomainContext,
        tick: u64,
    ) -> Result<PassReport, EngineError> {
        let now = now_ms();
        let mut report = PassReport::default();

        self.start_pending_trees(now).await?;

        let trees = self.running_trees().await?;
        let mut nodes = self.load_nodes(&trees).await?;

        self.recover_stalls(&mut nodes, now, &mut report).await?;

        let batch = self.pick_batch(chief, &nodes);
        for node_id in batch {
            self.execute_node(chief, ctx, &node_id, now, tick, &mut report)
                .await?;
        }

        self.aggregate(&trees, now, &mut report).await?;
        self.compact(now, &mut report).await?;

        Ok(report)
    }

    /// Move pending trees to running and make their roots schedulable
    async fn start_pending_trees(&self, now: i64) -> Result<(), EngineError> {
        for mut tree in self.store.active_trees().await? {
            if tree.status != TreeStatus::Pending {
                continue;
            }
            tree.status = TreeStatus::Running;
            tree.started_at = Some(now);
            self.store.update_tree(&tree).await?;

            if let Some(mut root) = self.store.node(&tree.root_id).await? {
                if root.status == NodeStatus::Pending {
                    root.status = NodeStatus::Ready;
                    root.ready_at = Some(now);
                    root.updated_at = now;
                    self.store.update_node(&root).await?;
                }
            }
            debug!(tree = %tree.id, goal = %tree.goal, "plan tree started");
        }
        Ok(())
    }

    async fn running_trees(&self) -> Result<Vec<PlanTree>, EngineError> {
        Ok(self
            .store
            .active_trees()
            .await?
            .into_iter()
            .filter(|t| t.status == TreeStatus::Running)
            .collect())
    }

    async fn load_nodes(&self, trees: &[PlanTree]) -> Result<Vec<PlanNode>, EngineError> {
        let mut nodes = Vec::new();
        for tree in trees {
            nodes.extend(self.store.nodes_for_tree(&tree.id).await?);
        }
        Ok(nodes)
    }

    /// Reset stalled nodes to ready, or fail them once retries run out
    async fn recover_stalls(
        &self,
        nodes: &mut [PlanNode],
        now: i64,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        for node in nodes.iter_mut() {
            if node.status != NodeStatus::Running {
                continue;
            }
            let Some(since) = node.running_since else {
                // Expanded composites await their children; they are not
                // actively running and cannot stall.
                continue;
            };
            if now - since < self.stall_timeout_ms {
                continue;
            }

            if node.retries >= self.max_retries {
                warn!(node = %node.id, retries = node.retries, "stalled node exhausted retries");
                node.status = NodeStatus::Failed;
                node.result = Some(json!({"error": "stalled", "retries": node.retries}));
                node.running_since = None;
                node.updated_at = now;
                report.actions.push(PassAction::StallExhausted {
                    node: node.id.clone(),
                });
            } else {
                node.retries += 1;
                node.status = NodeStatus::Ready;
                node.running_since = None;
                // Original ready_at is kept so a recovered node keeps its
                // age-based place in the queue.
                node.ready_at = node.ready_at.or(Some(now));
                node.updated_at = now;
                info!(node = %node.id, retries = node.retries, "recovered stalled node");
                report.actions.push(PassAction::RecoverStalled {
                    node: node.id.clone(),
                    retries: node.retries,
                });
                if let Some(bus) = &self.bus {
                    bus.publish(EngineEvent::StallRecovered {
                        node_id: node.id.clone(),
                        retries: node.retries,
                    })
                    .await;
                }
            }
            self.store.update_node(node).await?;
        }
        Ok(())
    }

    /// Order the ready set and take up to the parallelism cap
    fn pick_batch(&self, chief: &dyn Chief, nodes: &[PlanNode]) -> Vec<String> {
        let mut ready: Vec<&PlanNode> = nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Ready)
            .collect();

        ready.sort_by(|a, b| {
            let pa = self.priority_of(chief, a);
            let pb = self.priority_of(chief, b);
            pb.partial_cmp(&pa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    let age_a = a.ready_at.unwrap_or(a.created_at);
                    let age_b = b.ready_at.unwrap_or(b.created_at);
                    age_a.cmp(&age_b)
                })
                .then_with(|| a.seq.cmp(&b.seq))
        });

        ready
            .into_iter()
            .take(self.parallelism)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Explicit node priority wins; otherwise the chief's estimate
    fn priority_of(&self, chief: &dyn Chief, node: &PlanNode) -> f64 {
        node.priority
            .unwrap_or_else(|| chief.estimate_priority(&node.payload))
    }

    /// Expand a composite or perform a leaf
    async fn execute_node(
        &self,
        chief: &dyn Chief,
        ctx: &mut DomainContext,
        node_id: &str,
        now: i64,
        tick: u64,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        let Some(mut node) = self.store.node(node_id).await? else {
            return Ok(());
        };
        if node.status != NodeStatus::Ready {
            return Ok(());
        }

        node.status = NodeStatus::Running;
        node.running_since = Some(now);
        node.updated_at = now;
        self.store.update_node(&node).await?;

        match node.kind {
            NodeKind::Composite => {
                match chief.expand_node(&node.to_ref(), ctx).await {
                    Ok(Expansion::Children(seeds)) if seeds.is_empty() => {
                        node.status = NodeStatus::Done;
                        node.result = Some(json!({"note": "expansion produced no children"}));
                        node.running_since = None;
                    }
                    Ok(Expansion::Children(seeds)) => {
                        let count = seeds.len();
                        for seed in &seeds {
                            let mut child =
                                self.store.create_node(&node.tree_id, &node.id, seed).await?;
                            // Parent is running, so the child is immediately
                            // schedulable.
                            child.status = NodeStatus::Ready;
                            child.ready_at = Some(now);
                            child.updated_at = now;
                            self.store.update_node(&child).await?;
                        }
                        // Awaiting children: no longer actively running.
                        node.running_since = None;
                        report.actions.push(PassAction::Expand {
                            node: node.id.clone(),
                            children: count,
                        });
                        debug!(node = %node.id, children = count, "expanded composite node");
                    }
                    Ok(Expansion::Skip(reason)) => {
                        node.kind = NodeKind::Leaf;
                        node.status = NodeStatus::Ready;
                        node.running_since = None;
                        node.result = Some(json!({"expansion_skipped": reason}));
                        report.actions.push(PassAction::ExpandSkipped {
                            node: node.id.clone(),
                        });
                    }
                    Err(e) => {
                        warn!(node = %node.id, error = %e, "expansion failed");
                        node.status = NodeStatus::Failed;
                        node.result = Some(json!({"error": e.to_string()}));
                        node.running_since = None;
                        report.actions.push(PassAction::ExpandFailed {
                            node: node.id.clone(),
                        });
                    }
                }
            }
            NodeKind::Leaf => match chief.perform_step(&node.to_ref(), ctx).await {
                Ok(result) => {
                    node.status = match result.status {
                        StepStatus::Done => NodeStatus::Done,
                        StepStatus::Failed => NodeStatus::Failed,
                        StepStatus::Skipped => NodeStatus::Skipped,
                    };
                    node.result = Some(result.detail);
                    node.running_since = None;
                    report.actions.push(PassAction::Perform {
                        node: node.id.clone(),
                        status: result.status,
                    });
                }
                Err(e) => {
                    warn!(node = %node.id, error = %e, "step failed");
                    node.status = NodeStatus::Failed;
                    node.result = Some(json!({"error": e.to_string()}));
                    node.running_since = None;
                    report.actions.push(PassAction::StepFailed {
                        node: node.id.clone(),
                    });
                }
            },
        }

        node.updated_at = now;
        self.store.update_node(&node).await?;

        if node.status.is_terminal() {
            self.record_node_step(chief, &node, tick).await;
        }

        Ok(())
    }

    /// Record one trajectory step for a node completion
    async fn record_node_step(&self, chief: &dyn Chief, node: &PlanNode, tick: u64) {
        let Some(sink) = &self.sink else {
            return;
        };

        let reward = match node.status {
            NodeStatus::Done => 2.0,
            NodeStatus::Skipped => 0.0,
            _ => -4.0,
        };
        let step = TrajectoryStep::new(
            FeatureMap::new()
                .with("label", node.label.clone())
                .with("retries", node.retries as u64),
            Action::with_params("plan_node", json!({"node": node.id})),
            reward,
            FeatureMap::new().with("status", node.status.as_str()),
            false,
        )
        .with_metadata(json!({"tree_id": node.tree_id, "node_id": node.id}));

        if let Err(e) = sink.record(chief.domain(), tick, &step).await {
            warn!(node = %node.id, error = %e, "failed to record node trajectory step");
        }
    }

    /// Bubble terminal children up through composites, then finish trees
    async fn aggregate(
        &self,
        trees: &[PlanTree],
        now: i64,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        for tree in trees {
            let nodes = self.store.nodes_for_tree(&tree.id).await?;
            let mut by_id: HashMap<String, PlanNode> =
                nodes.into_iter().map(|n| (n.id.clone(), n)).collect();

            loop {
                let mut changed: Option<PlanNode> = None;

                for node in by_id.values() {
                    if node.kind != NodeKind::Composite
                        || node.status != NodeStatus::Running
                        || node.running_since.is_some()
                    {
                        continue;
                    }
                    let kids: Vec<&PlanNode> = by_id
                        .values()
                        .filter(|n| n.parent_id.as_deref() == Some(node.id.as_str()))
                        .collect();
                    if kids.is_empty() || !kids.iter().all(|k| k.status.is_terminal()) {
                        continue;
                    }

                    let failed = kids.iter().filter(|k| k.status == NodeStatus::Failed).count();
                    let done = kids.iter().filter(|k| k.status == NodeStatus::Done).count();
                    let skipped = kids
                        .iter()
                        .filter(|k| k.status == NodeStatus::Skipped)
                        .count();

                    let mut updated = node.clone();
                    updated.status = if failed > 0 {
                        NodeStatus::Failed
                    } else {
                        NodeStatus::Done
                    };
                    updated.result = Some(json!({
                        "done": done,
                        "failed": failed,
                        "skipped": skipped,
                    }));
                    updated.updated_at = now;
                    changed = Some(updated);
                    break;
                }

                match changed {
                    Some(updated) => {
                        self.store.update_node(&updated).await?;
                        by_id.insert(updated.id.clone(), updated);
                    }
                    None => break,
                }
            }

            let Some(root) = by_id.get(&tree.root_id) else {
                continue;
            };
            if !root.status.is_terminal() {
                continue;
            }

            let mut finished = tree.clone();
            finished.status = match root.status {
                NodeStatus::Failed => TreeStatus::Failed,
                _ => TreeStatus::Completed,
            };
            finished.completed_at = Some(now);
            if finished.status == TreeStatus::Failed {
                let mut failures: Vec<&PlanNode> = by_id
                    .values()
                    .filter(|n| n.status == NodeStatus::Failed && n.kind == NodeKind::Leaf)
                    .collect();
                failures.sort_by_key(|n| n.seq);
                finished.error = failures
                    .first()
                    .map(|n| format!("node '{}' failed", n.label))
                    .or_else(|| Some("plan failed".to_string()));
            }
            self.store.update_tree(&finished).await?;

            info!(tree = %finished.id, status = finished.status.as_str(), "plan tree finished");
            if let Some(bus) = &self.bus {
                bus.publish(EngineEvent::PlanTreeFinished {
                    tree_id: finished.id.clone(),
                    status: finished.status.as_str().to_string(),
                })
                .await;
            }
            match finished.status {
                TreeStatus::Failed => report.failed_trees.push(finished.id),
                _ => report.completed_trees.push(finished.id),
            }
        }
        Ok(())
    }

    /// Archive trees that have been terminal past the retention window
    async fn compact(&self, now: i64, report: &mut PassReport) -> Result<(), EngineError> {
        for mut tree in self.store.active_trees().await? {
            if !tree.status.is_terminal() {
                continue;
            }
            let finished_at = tree
                .completed_at
                .or(tree.started_at)
                .unwrap_or(tree.created_at);
            if now - finished_at < self.retention_ms {
                continue;
            }
            tree.archived = true;
            self.store.update_tree(&tree).await?;
            debug!(tree = %tree.id, "compacted terminal plan tree");
            report.actions.push(PassAction::Compact { tree: tree.id });
        }
        Ok(())
    }
}
