//! Database integration tests
//!
//! Round-trips through the SQLite implementations of the plan store and
//! trajectory sink, plus a full scheduling pass over the SQLite store.

use maestro_engine::chiefs::MissionChief;
use maestro_engine::config::PlanConfig;
use maestro_engine::db::Database;
use maestro_engine::plan::engine::PlanEngine;
use maestro_engine::plan::store::PlanStore;
use maestro_engine::plan::types::{NodeStatus, TreeStatus};
use maestro_engine::trajectory::TrajectorySink;
use sdk::context::DomainContext;
use sdk::types::{Action, FeatureMap, NodeKind, NodeSeed, TrajectoryStep};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

async fn open_db(dir: &TempDir) -> Database {
    Database::new(&dir.path().join("test.db")).await.unwrap()
}

#[tokio::test]
async fn plan_tree_round_trips_through_sqlite() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let store = db.plans();

    let tree = store
        .create_tree("demo", "mission", json!({"tasks": ["a", "b"]}))
        .await
        .unwrap();

    let loaded = store.tree(&tree.id).await.unwrap().unwrap();
    assert_eq!(loaded, tree);

    let root = store.node(&tree.root_id).await.unwrap().unwrap();
    assert_eq!(root.kind, NodeKind::Composite);
    assert_eq!(root.status, NodeStatus::Pending);
    assert_eq!(root.payload["goal"], "demo");
    assert_eq!(root.payload["tasks"], json!(["a", "b"]));
    assert_eq!(root.seq, 0);

    db.close().await.unwrap();
}

#[tokio::test]
async fn node_updates_persist_every_field() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let store = db.plans();

    let tree = store.create_tree("demo", "mission", Value::Null).await.unwrap();
    let mut node = store
        .create_node(
            &tree.id,
            &tree.root_id,
            &NodeSeed::leaf("step", json!({"task": "step"})).with_priority(0.8),
        )
        .await
        .unwrap();

    node.status = NodeStatus::Ready;
    node.ready_at = Some(1234);
    node.retries = 1;
    node.result = Some(json!({"partial": true}));
    store.update_node(&node).await.unwrap();

    let loaded = store.node(&node.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, NodeStatus::Ready);
    assert_eq!(loaded.ready_at, Some(1234));
    assert_eq!(loaded.retries, 1);
    assert_eq!(loaded.priority, Some(0.8));
    assert_eq!(loaded.result, Some(json!({"partial": true})));

    db.close().await.unwrap();
}

#[tokio::test]
async fn children_keep_insertion_order() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let store = db.plans();

    let tree = store.create_tree("demo", "mission", Value::Null).await.unwrap();
    for label in ["one", "two", "three"] {
        store
            .create_node(&tree.id, &tree.root_id, &NodeSeed::leaf(label, Value::Null))
            .await
            .unwrap();
    }

    let children = store.children(&tree.root_id).await.unwrap();
    let labels: Vec<&str> = children.iter().map(|c| c.label.as_str()).collect();
    assert_eq!(labels, vec!["one", "two", "three"]);

    let seqs: Vec<i64> = children.iter().map(|c| c.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);

    db.close().await.unwrap();
}

#[tokio::test]
async fn archived_trees_leave_the_active_set() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let store = db.plans();

    let mut tree = store.create_tree("demo", "mission", Value::Null).await.unwrap();
    assert_eq!(store.active_trees().await.unwrap().len(), 1);

    tree.archived = true;
    tree.status = TreeStatus::Completed;
    store.update_tree(&tree).await.unwrap();

    assert!(store.active_trees().await.unwrap().is_empty());
    assert!(store.tree(&tree.id).await.unwrap().is_some());
    assert_eq!(store.recent_trees(10).await.unwrap().len(), 1);

    db.close().await.unwrap();
}

#[tokio::test]
async fn trajectory_steps_round_trip_and_stay_ordered() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let sink = db.trajectories();

    for tick in 1..=4u64 {
        let step = TrajectoryStep::new(
            FeatureMap::new().with("pending", 10 - tick),
            Action::with_params("activate_pending", json!({"strategy": "fifo"})),
            1.5,
            FeatureMap::new().with("pending", 9 - tick),
            tick == 4,
        )
        .with_metadata(json!({"domain": "intake"}));
        sink.record("intake", tick, &step).await.unwrap();
    }
    sink.record(
        "balance",
        2,
        &TrajectoryStep::new(
            FeatureMap::new(),
            Action::bare("rebalance"),
            -0.5,
            FeatureMap::new(),
            false,
        ),
    )
    .await
    .unwrap();

    assert_eq!(sink.count().await.unwrap(), 5);

    let intake_steps = sink.steps_for("intake").await.unwrap();
    let ticks: Vec<u64> = intake_steps.iter().map(|s| s.tick).collect();
    assert_eq!(ticks, vec![1, 2, 3, 4]);
    assert!(intake_steps[3].step.done);
    assert_eq!(
        intake_steps[0].step.action.param_str("strategy"),
        Some("fifo")
    );

    let recent = sink.recent(2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1].chief, "balance");

    db.close().await.unwrap();
}

#[tokio::test]
async fn scheduling_pass_runs_over_the_sqlite_store() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let store: Arc<dyn PlanStore> = Arc::new(db.plans());

    let config = PlanConfig::default();
    let chief = MissionChief::new(PlanEngine::new(Arc::clone(&store), &config));
    let engine = PlanEngine::new(Arc::clone(&store), &config);

    let tree = store.create_tree("demo", "mission", Value::Null).await.unwrap();

    let mut ctx = DomainContext::new();
    engine.advance(&chief, &mut ctx, 1).await.unwrap();
    engine.advance(&chief, &mut ctx, 2).await.unwrap();

    let finished = store.tree(&tree.id).await.unwrap().unwrap();
    assert_eq!(finished.status, TreeStatus::Completed);
    assert!(finished.completed_at.is_some());

    db.close().await.unwrap();
}
