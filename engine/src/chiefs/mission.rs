//! Mission chief
//!
//! The plan-aware controller: goals queued into its context become plan
//! trees, decomposed through `expand_node` into executable task leaves and
//! advanced one scheduling pass per turn. Observation reads only counters
//! cached after the previous pass, so it stays free of store I/O.
//!
//! Context keys: `goal_queue` (array of goals, either strings or
//! `{goal, tasks}` objects), `active_trees`, `missions_opened`,
//! `tasks_completed`, `last_pass`.

use async_trait::async_trait;
use sdk::chief::Chief;
use sdk::context::DomainContext;
use sdk::errors::EngineError;
use sdk::types::{
    Action, Capability, Decision, Expansion, FeatureMap, NodeSeed, Observation, Outcome,
    PlanNodeRef, StepResult, TrajectoryStep,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::plan::engine::PlanEngine;
use crate::trajectory::reward;

/// Domain tag
pub const DOMAIN: &str = "mission";

/// Goal-decomposition controller
pub struct MissionChief {
    engine: PlanEngine,
}

impl MissionChief {
    pub fn new(engine: PlanEngine) -> Self {
        Self { engine }
    }

    /// Queue a goal for the next turn
    ///
    /// Accepts a bare goal string or a `{goal, tasks: [...]}` object.
    pub fn queue_goal(ctx: &mut DomainContext, goal: Value) {
        let mut queue = match ctx.get("goal_queue") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        queue.push(goal);
        ctx.set("goal_queue", Value::Array(queue));
    }

    fn features(&self, ctx: &DomainContext) -> FeatureMap {
        let queue_len = match ctx.get("goal_queue") {
            Some(Value::Array(items)) => items.len() as u64,
            _ => 0,
        };
        FeatureMap::new()
            .with("goal_queue", queue_len)
            .with("active_trees", ctx.count("active_trees"))
            .with("missions_opened", ctx.count("missions_opened"))
            .with("tasks_completed", ctx.count("tasks_completed"))
    }

    async fn open_mission(&self, ctx: &mut DomainContext) -> Result<(), EngineError> {
        let mut queue = match ctx.get("goal_queue") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        if queue.is_empty() {
            return Ok(());
        }
        let entry = queue.remove(0);
        ctx.set("goal_queue", Value::Array(queue));

        let (goal, metadata) = match &entry {
            Value::String(goal) => (goal.clone(), Value::Null),
            Value::Object(obj) => {
                let goal = obj
                    .get("goal")
                    .and_then(Value::as_str)
                    .unwrap_or("unnamed mission")
                    .to_string();
                (goal, entry.clone())
            }
            _ => ("unnamed mission".to_string(), Value::Null),
        };

        let tree = self.engine.store().create_tree(&goal, DOMAIN, metadata).await?;
        debug!(tree = %tree.id, goal = %goal, "mission opened");

        ctx.set("missions_opened", ctx.count("missions_opened") + 1);
        ctx.set("active_trees", ctx.count("active_trees") + 1);
        Ok(())
    }

    async fn refresh_tree_count(&self, ctx: &mut DomainContext) -> Result<(), EngineError> {
        let active = self
            .engine
            .store()
            .active_trees()
            .await?
            .iter()
            .filter(|t| !t.status.is_terminal())
            .count() as u64;
        ctx.set("active_trees", active);
        Ok(())
    }
}

#[async_trait]
impl Chief for MissionChief {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn action_space(&self) -> Vec<Capability> {
        vec![
            Capability::bare("open_mission", DOMAIN)
                .describe("Turn the next queued goal into a plan tree")
                .with_schema(json!({"tick": "number"})),
            Capability::bare("advance_plans", DOMAIN)
                .describe("Run one scheduling pass over active plan trees")
                .with_schema(json!({"tick": "number"})),
        ]
    }

    fn plan_capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::bare("expand_goal", DOMAIN)
                .describe("Decompose a mission goal into task leaves"),
            Capability::bare("perform_task", DOMAIN).describe("Execute one task leaf"),
        ]
    }

    fn observe(&self, ctx: &DomainContext, tick: u64) -> Result<Observation, EngineError> {
        Ok(Observation::new(DOMAIN, self.features(ctx), tick, ctx.rev()))
    }

    fn decide(&self, obs: &Observation) -> Decision {
        if obs.features.count("goal_queue") > 0 {
            return Decision::Act(Action::with_params(
                "open_mission",
                json!({"tick": obs.tick}),
            ));
        }
        if obs.features.count("active_trees") > 0 {
            return Decision::Act(Action::with_params(
                "advance_plans",
                json!({"tick": obs.tick}),
            ));
        }
        Decision::Wait { delay_ms: 2000 }
    }

    async fn act(&self, action: &Action, ctx: &mut DomainContext) -> Result<(), EngineError> {
        let tick = action.param_u64("tick").unwrap_or(0);
        match action.tag.as_str() {
            "open_mission" => {
                self.open_mission(ctx).await?;
            }
            "advance_plans" => {
                let report = self.engine.advance(self, ctx, tick).await?;
                ctx.set(
                    "tasks_completed",
                    ctx.count("tasks_completed") + report.performed(),
                );
                ctx.set("last_pass", report.summary());
                self.refresh_tree_count(ctx).await?;
            }
            other => {
                warn!(action = other, "unknown mission action ignored");
                return Ok(());
            }
        }
        ctx.set("last_action_tag", action.tag.clone());
        Ok(())
    }

    fn report(&self, ctx: &DomainContext, obs: &Observation) -> Outcome {
        let acted = ctx.rev() != obs.context_rev;
        let pass = ctx.get("last_pass").cloned().unwrap_or(Value::Null);

        // Pass numbers belong to the turn that ran the pass; an
        // open_mission turn must not re-claim them.
        let advanced = acted && ctx.text("last_action_tag") == Some("advance_plans");
        let (performed, failures, recovered) = if advanced {
            (
                pass.get("performed").and_then(Value::as_u64).unwrap_or(0),
                pass.get("failures").and_then(Value::as_u64).unwrap_or(0),
                pass.get("recovered").and_then(Value::as_u64).unwrap_or(0),
            )
        } else {
            (0, 0, 0)
        };

        let value = reward::clamped(
            reward::throughput_bonus(performed)
                + reward::failure_penalty(failures)
                + reward::stall_penalty(recovered),
        );

        let active_trees = ctx.count("active_trees");
        let done = acted && active_trees == 0;

        let mut metrics = serde_json::Map::new();
        metrics.insert("active_trees".to_string(), json!(active_trees));
        metrics.insert("performed".to_string(), json!(performed));
        metrics.insert("failures".to_string(), json!(failures));

        let step = TrajectoryStep::new(
            obs.features.clone(),
            Action::bare(ctx.text("last_action_tag").unwrap_or("none")),
            value,
            self.features(ctx),
            done,
        )
        .with_metadata(json!({"domain": DOMAIN}));

        Outcome {
            reward: value,
            metrics,
            step,
        }
    }

    async fn expand_node(
        &self,
        node: &PlanNodeRef,
        _ctx: &mut DomainContext,
    ) -> Result<Expansion, EngineError> {
        // Explicit task list wins; a bare goal gets the default two-phase
        // decomposition.
        if let Some(tasks) = node.payload.get("tasks").and_then(Value::as_array) {
            let seeds = tasks
                .iter()
                .map(|task| match task {
                    Value::String(name) => NodeSeed::leaf(name.clone(), json!({"task": name})),
                    Value::Object(obj) => {
                        let name = obj
                            .get("task")
                            .and_then(Value::as_str)
                            .unwrap_or("task")
                            .to_string();
                        let mut seed = NodeSeed::leaf(name, task.clone());
                        if let Some(priority) = obj.get("priority").and_then(Value::as_f64) {
                            seed = seed.with_priority(priority);
                        }
                        seed
                    }
                    other => NodeSeed::leaf("task", other.clone()),
                })
                .collect();
            return Ok(Expansion::Children(seeds));
        }

        if node.payload.get("goal").is_some() {
            return Ok(Expansion::Children(vec![
                NodeSeed::leaf("survey", json!({"task": "survey"})),
                NodeSeed::leaf("execute", json!({"task": "execute"})),
            ]));
        }

        Ok(Expansion::Skip("nothing to decompose".to_string()))
    }

    async fn perform_step(
        &self,
        node: &PlanNodeRef,
        ctx: &mut DomainContext,
    ) -> Result<StepResult, EngineError> {
        let task = node
            .payload
            .get("task")
            .and_then(Value::as_str)
            .unwrap_or(node.label.as_str())
            .to_string();

        if node.payload.get("fail").and_then(Value::as_bool) == Some(true) {
            return Ok(StepResult::failed(
                json!({"task": task, "error": "task marked to fail"}),
            ));
        }
        if node.payload.get("skip").and_then(Value::as_bool) == Some(true) {
            return Ok(StepResult::skipped(format!("task '{}' skipped", task)));
        }

        ctx.set("last_task", task.clone());
        Ok(StepResult::done(json!({"task": task, "completed": true})))
    }

    fn estimate_priority(&self, payload: &Value) -> f64 {
        if let Some(priority) = payload.get("priority").and_then(Value::as_f64) {
            return priority.clamp(0.0, 1.0);
        }
        match payload.get("urgency").and_then(Value::as_str) {
            Some("high") => 0.9,
            Some("low") => 0.2,
            _ => 0.5,
        }
    }
}
