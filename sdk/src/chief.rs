//! Chief trait
//!
//! A chief is a domain-scoped controller driven by the conductor once per
//! tick through observe → decide → act → report. Any new domain plugs in by
//! implementing the four required operations; the plan extension is
//! optional and defaults to "not plan-aware".
//!
//! Contract rules the conductor relies on:
//!
//! - `observe` is side-effect-free and never blocks on I/O.
//! - `decide` is a pure function of the observation. Implementations are
//!   heuristic cascades today; a learned policy can replace one without any
//!   conductor change.
//! - `act` is the only operation allowed to mutate domain state or trigger
//!   side effects. An action tag outside the chief's known set must be a
//!   logged no-op, never a crash.
//! - `report` derives reward and metrics purely from the post-action
//!   context, so calling it twice on identical state yields identical
//!   output.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::DomainContext;
use crate::errors::EngineError;
use crate::types::{
    Action, Capability, Decision, Expansion, Observation, Outcome, PlanNodeRef, StepResult,
};

/// Trait every domain controller implements
#[async_trait]
pub trait Chief: Send + Sync {
    /// Domain tag this chief controls
    fn domain(&self) -> &str;

    /// The enumerable set of actions this chief may return
    ///
    /// An empty space means unconstrained; a non-empty space is checked by
    /// the conductor (out-of-space decisions are logged, not rejected).
    fn action_space(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// Snapshot the domain into a compact feature map
    fn observe(&self, ctx: &DomainContext, tick: u64) -> Result<Observation, EngineError>;

    /// Choose the next action from an observation
    fn decide(&self, obs: &Observation) -> Decision;

    /// Execute an action against the domain context
    async fn act(&self, action: &Action, ctx: &mut DomainContext) -> Result<(), EngineError>;

    /// Derive reward, metrics, and the trajectory step for a finished turn
    ///
    /// `obs` is the pre-action observation; the post-action state comes
    /// from `ctx`.
    fn report(&self, ctx: &DomainContext, obs: &Observation) -> Outcome;

    // Plan extension. A chief that keeps the defaults is not plan-aware.

    /// Capabilities this chief exposes to the plan engine
    fn plan_capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// Expand a composite node into child seeds
    async fn expand_node(
        &self,
        node: &PlanNodeRef,
        ctx: &mut DomainContext,
    ) -> Result<Expansion, EngineError> {
        let _ = ctx;
        Ok(Expansion::Skip(format!(
            "chief '{}' does not expand nodes",
            self.domain()
        )))
    }

    /// Perform a leaf node
    async fn perform_step(
        &self,
        node: &PlanNodeRef,
        ctx: &mut DomainContext,
    ) -> Result<StepResult, EngineError> {
        let _ = ctx;
        Err(EngineError::Step {
            node: node.id.clone(),
            detail: format!("chief '{}' is not plan-aware", self.domain()),
        })
    }

    /// Estimate scheduling priority for a node payload
    ///
    /// Consulted only when a node carries no explicit priority.
    fn estimate_priority(&self, payload: &Value) -> f64 {
        let _ = payload;
        0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureMap;
    use serde_json::json;

    /// Minimal chief exercising the default plan extension
    struct FlatChief;

    #[async_trait]
    impl Chief for FlatChief {
        fn domain(&self) -> &str {
            "flat"
        }

        fn observe(&self, ctx: &DomainContext, tick: u64) -> Result<Observation, EngineError> {
            Ok(Observation::new(
                "flat",
                FeatureMap::new().with("items", ctx.count("items")),
                tick,
                ctx.rev(),
            ))
        }

        fn decide(&self, obs: &Observation) -> Decision {
            if obs.features.count("items") > 0 {
                Decision::Act(Action::bare("drain"))
            } else {
                Decision::Wait { delay_ms: 100 }
            }
        }

        async fn act(&self, action: &Action, ctx: &mut DomainContext) -> Result<(), EngineError> {
            if action.tag == "drain" {
                ctx.set("items", 0u64);
            }
            Ok(())
        }

        fn report(&self, ctx: &DomainContext, obs: &Observation) -> Outcome {
            let step = crate::types::TrajectoryStep::new(
                obs.features.clone(),
                Action::bare("drain"),
                1.0,
                FeatureMap::new().with("items", ctx.count("items")),
                false,
            );
            Outcome {
                reward: 1.0,
                metrics: serde_json::Map::new(),
                step,
            }
        }
    }

    #[tokio::test]
    async fn test_default_expand_is_skip() {
        let chief = FlatChief;
        let mut ctx = DomainContext::new();
        let node = PlanNodeRef {
            id: "n-1".to_string(),
            tree_id: "t-1".to_string(),
            label: "root".to_string(),
            payload: Value::Null,
            retries: 0,
        };

        match chief.expand_node(&node, &mut ctx).await.unwrap() {
            Expansion::Skip(reason) => assert!(reason.contains("flat")),
            Expansion::Children(_) => panic!("default expansion must skip"),
        }
    }

    #[tokio::test]
    async fn test_default_perform_step_fails() {
        let chief = FlatChief;
        let mut ctx = DomainContext::new();
        let node = PlanNodeRef {
            id: "n-2".to_string(),
            tree_id: "t-1".to_string(),
            label: "leaf".to_string(),
            payload: json!({"task": "x"}),
            retries: 0,
        };

        let err = chief.perform_step(&node, &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("n-2"));
    }

    #[test]
    fn test_default_priority_estimate() {
        let chief = FlatChief;
        assert!((chief.estimate_priority(&Value::Null) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_spaces_are_empty() {
        let chief = FlatChief;
        assert!(chief.action_space().is_empty());
        assert!(chief.plan_capabilities().is_empty());
    }
}
