//! Lineage chief
//!
//! Guards the structural health of the domain's history: a delta chain
//! that grows too deep gets consolidated before anything else is
//! considered, and a long stretch without a checkpoint forces one.
//!
//! Context keys: `chain_depth`, `entry_count`, `last_checkpoint_tick`,
//! `consolidations`, `checkpoints`.

use async_trait::async_trait;
use sdk::chief::Chief;
use sdk::context::DomainContext;
use sdk::errors::EngineError;
use sdk::types::{
    Action, Capability, Decision, FeatureMap, Observation, Outcome, TrajectoryStep,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::LineageConfig;
use crate::trajectory::reward;

/// Domain tag
pub const DOMAIN: &str = "lineage";

/// Structural-health controller
pub struct LineageChief {
    config: LineageConfig,
}

impl LineageChief {
    pub fn new(config: LineageConfig) -> Self {
        Self { config }
    }

    fn features(&self, ctx: &DomainContext, tick: u64) -> FeatureMap {
        let last_checkpoint = ctx.count("last_checkpoint_tick");
        FeatureMap::new()
            .with("chain_depth", ctx.count("chain_depth"))
            .with("entry_count", ctx.count("entry_count"))
            .with("stale_ticks", tick.saturating_sub(last_checkpoint))
    }
}

#[async_trait]
impl Chief for LineageChief {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn action_space(&self) -> Vec<Capability> {
        vec![
            Capability::bare("consolidate", DOMAIN)
                .describe("Collapse a deep delta chain into one snapshot")
                .with_schema(json!({"tick": "number"})),
            Capability::bare("checkpoint", DOMAIN)
                .describe("Persist a checkpoint of the current lineage head")
                .with_schema(json!({"tick": "number"})),
        ]
    }

    fn observe(&self, ctx: &DomainContext, tick: u64) -> Result<Observation, EngineError> {
        Ok(Observation::new(
            DOMAIN,
            self.features(ctx, tick),
            tick,
            ctx.rev(),
        ))
    }

    fn decide(&self, obs: &Observation) -> Decision {
        let chain_depth = obs.features.count("chain_depth");
        let stale_ticks = obs.features.count("stale_ticks");

        // Structural health violation comes before everything else
        if chain_depth > self.config.max_chain_depth {
            return Decision::Act(Action::with_params(
                "consolidate",
                json!({"tick": obs.tick}),
            ));
        }

        if stale_ticks >= self.config.checkpoint_after_ticks {
            return Decision::Act(Action::with_params(
                "checkpoint",
                json!({"tick": obs.tick}),
            ));
        }

        Decision::Wait { delay_ms: 1000 }
    }

    async fn act(&self, action: &Action, ctx: &mut DomainContext) -> Result<(), EngineError> {
        let tick = action.param_u64("tick").unwrap_or(0);
        match action.tag.as_str() {
            "consolidate" => {
                let depth = ctx.count("chain_depth");
                ctx.set("chain_depth", 1u64);
                ctx.set("consolidations", ctx.count("consolidations") + 1);
                ctx.set("last_consolidated_depth", depth);
                debug!(depth, "consolidated delta chain");
            }
            "checkpoint" => {
                ctx.set("checkpoints", ctx.count("checkpoints") + 1);
                ctx.set("last_checkpoint_tick", tick);
            }
            other => {
                warn!(action = other, "unknown lineage action ignored");
                return Ok(());
            }
        }
        ctx.set("last_action_tag", action.tag.clone());
        Ok(())
    }

    fn report(&self, ctx: &DomainContext, obs: &Observation) -> Outcome {
        let acted = ctx.rev() != obs.context_rev;
        let chain_depth = ctx.count("chain_depth");

        let health_penalty = if chain_depth > self.config.max_chain_depth {
            -3.0
        } else {
            0.0
        };
        let consolidation_bonus = if acted
            && ctx.text("last_action_tag") == Some("consolidate")
        {
            4.0
        } else {
            0.0
        };
        let value = reward::clamped(consolidation_bonus + health_penalty);

        let done = acted && ctx.text("last_action_tag") == Some("checkpoint");

        let mut metrics = serde_json::Map::new();
        metrics.insert("chain_depth".to_string(), json!(chain_depth));
        metrics.insert("checkpoints".to_string(), json!(ctx.count("checkpoints")));

        let step = TrajectoryStep::new(
            obs.features.clone(),
            Action::bare(ctx.text("last_action_tag").unwrap_or("none")),
            value,
            self.features(ctx, obs.tick),
            done,
        )
        .with_metadata(json!({"domain": DOMAIN}));

        Outcome {
            reward: value,
            metrics,
            step,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chief() -> LineageChief {
        LineageChief::new(LineageConfig::default())
    }

    #[test]
    fn test_deep_chain_consolidates_first() {
        let mut ctx = DomainContext::new();
        ctx.set("chain_depth", 12u64);
        // Also stale; consolidation still wins the cascade
        let obs = chief().observe(&ctx, 100).unwrap();

        match chief().decide(&obs) {
            Decision::Act(action) => assert_eq!(action.tag, "consolidate"),
            other => panic!("expected consolidate, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_lineage_checkpoints() {
        let mut ctx = DomainContext::new();
        ctx.set("chain_depth", 2u64);
        let obs = chief().observe(&ctx, 25).unwrap();

        match chief().decide(&obs) {
            Decision::Act(action) => assert_eq!(action.tag, "checkpoint"),
            other => panic!("expected checkpoint, got {:?}", other),
        }
    }

    #[test]
    fn test_healthy_lineage_waits() {
        let mut ctx = DomainContext::new();
        ctx.set("chain_depth", 2u64);
        ctx.set("last_checkpoint_tick", 10u64);
        let obs = chief().observe(&ctx, 15).unwrap();

        assert_eq!(chief().decide(&obs), Decision::Wait { delay_ms: 1000 });
    }

    #[tokio::test]
    async fn test_consolidate_resets_chain() {
        let c = chief();
        let mut ctx = DomainContext::new();
        ctx.set("chain_depth", 12u64);

        c.act(&Action::with_params("consolidate", json!({"tick": 5})), &mut ctx)
            .await
            .unwrap();

        assert_eq!(ctx.count("chain_depth"), 1);
        assert_eq!(ctx.count("consolidations"), 1);
        assert_eq!(ctx.count("last_consolidated_depth"), 12);
    }

    #[tokio::test]
    async fn test_checkpoint_marks_episode_boundary() {
        let c = chief();
        let mut ctx = DomainContext::new();
        let obs = c.observe(&ctx, 30).unwrap();

        c.act(&Action::with_params("checkpoint", json!({"tick": 30})), &mut ctx)
            .await
            .unwrap();

        let outcome = c.report(&ctx, &obs);
        assert!(outcome.step.done);
        assert_eq!(ctx.count("last_checkpoint_tick"), 30);
    }

    #[test]
    fn test_decisions_conform_to_action_space() {
        let c = chief();
        let space = c.action_space();

        for (depth, tick) in [(12u64, 1u64), (0, 50), (3, 2)] {
            let mut ctx = DomainContext::new();
            ctx.set("chain_depth", depth);
            let obs = c.observe(&ctx, tick).unwrap();
            if let Decision::Act(action) = c.decide(&obs) {
                assert!(space.iter().any(|cap| cap.matches(&action)));
            }
        }
    }
}
