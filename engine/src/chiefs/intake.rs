//! Work-intake chief
//!
//! Controls the flow of pending work into the active set. The decision
//! cascade, in fixed priority order: energy gate first (below the floor the
//! chief backs off), then schedulable work (activation strategy picked by
//! secondary heuristics), then load shedding, then an idle checkpoint.
//!
//! Context keys: `pending_count`, `active_count`, `energy_level`,
//! `last_action_tag`, `last_action_tick`, `last_turn_activated`,
//! `checkpoints`.

use async_trait::async_trait;
use sdk::chief::Chief;
use sdk::context::DomainContext;
use sdk::errors::EngineError;
use sdk::types::{
    Action, Capability, Decision, FeatureMap, Observation, Outcome, TrajectoryStep,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::IntakeConfig;
use crate::trajectory::reward;

/// Domain tag
pub const DOMAIN: &str = "intake";

/// Work-intake controller
pub struct IntakeChief {
    config: IntakeConfig,
}

impl IntakeChief {
    pub fn new(config: IntakeConfig) -> Self {
        Self { config }
    }

    fn features(&self, ctx: &DomainContext, tick: u64) -> FeatureMap {
        let last_action_tick = ctx.count("last_action_tick");
        FeatureMap::new()
            .with("pending_count", ctx.count("pending_count"))
            .with("active_count", ctx.count("active_count"))
            .with("energy_level", ctx.ratio_or("energy_level", 1.0))
            .with("idle_ticks", tick.saturating_sub(last_action_tick))
            .with("deferred_hints", ctx.deferrals().len() as u64)
    }

    /// Secondary heuristic: which activation strategy fits the moment
    fn pick_strategy(&self, pending: u64, energy: f64) -> &'static str {
        if energy >= self.config.strategy_energy {
            "priority"
        } else if pending > self.config.energy_aware_depth {
            "energy_aware"
        } else {
            "fifo"
        }
    }
}

#[async_trait]
impl Chief for IntakeChief {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn action_space(&self) -> Vec<Capability> {
        vec![
            Capability::bare("activate_pending", DOMAIN)
                .describe("Move pending work into the active set")
                .with_schema(json!({"strategy": "string", "tick": "number"})),
            Capability::bare("rebalance", DOMAIN)
                .describe("Shed active load back toward a sustainable level")
                .with_schema(json!({"tick": "number"})),
            Capability::bare("checkpoint", DOMAIN)
                .describe("Snapshot intake counters after a long idle stretch")
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
        let pending = obs.features.count("pending_count");
        let active = obs.features.count("active_count");
        let energy = obs.features.ratio_or("energy_level", 1.0);
        let idle_ticks = obs.features.count("idle_ticks");

        // Energy gate below the critical floor: back off before anything
        if energy < self.config.energy_floor {
            return Decision::Wait {
                delay_ms: self.config.energy_backoff_ms,
            };
        }

        // Schedulable work with the gate open
        if pending > 0 {
            let strategy = self.pick_strategy(pending, energy);
            return Decision::Act(Action::with_params(
                "activate_pending",
                json!({"strategy": strategy, "tick": obs.tick}),
            ));
        }

        // Load shedding
        if active > self.config.high_load {
            return Decision::Act(Action::with_params(
                "rebalance",
                json!({"tick": obs.tick}),
            ));
        }

        // Idle long enough: checkpoint
        if idle_ticks >= self.config.idle_checkpoint_ticks {
            return Decision::Act(Action::with_params(
                "checkpoint",
                json!({"tick": obs.tick}),
            ));
        }

        Decision::Wait { delay_ms: 250 }
    }

    async fn act(&self, action: &Action, ctx: &mut DomainContext) -> Result<(), EngineError> {
        let tick = action.param_u64("tick").unwrap_or(0);
        match action.tag.as_str() {
            "activate_pending" => {
                let pending = ctx.count("pending_count");
                let batch = pending.min(self.config.batch_limit);
                let energy = ctx.ratio_or("energy_level", 1.0);

                ctx.set("pending_count", pending - batch);
                ctx.set("active_count", ctx.count("active_count") + batch);
                ctx.set("energy_level", (energy - 0.01 * batch as f64).max(0.0));
                ctx.set("last_turn_activated", batch);
                ctx.set(
                    "last_strategy",
                    action.param_str("strategy").unwrap_or("fifo"),
                );
                let drained = ctx.take_deferrals();
                if !drained.is_empty() {
                    debug!(from = ?drained, "absorbed deferred intake hints");
                }
                debug!(batch, "activated pending work");
            }
            "rebalance" => {
                let active = ctx.count("active_count");
                ctx.set("active_count", active / 2);
                ctx.set("rebalances", ctx.count("rebalances") + 1);
                ctx.set("last_turn_activated", 0u64);
            }
            "checkpoint" => {
                ctx.set("checkpoints", ctx.count("checkpoints") + 1);
                ctx.set("last_turn_activated", 0u64);
            }
            other => {
                // Unknown actions are a logged no-op, never a crash
                warn!(action = other, "unknown intake action ignored");
                return Ok(());
            }
        }
        ctx.set("last_action_tag", action.tag.clone());
        ctx.set("last_action_tick", tick);
        Ok(())
    }

    fn report(&self, ctx: &DomainContext, obs: &Observation) -> Outcome {
        let acted = ctx.rev() != obs.context_rev;
        let activated = if acted {
            ctx.count("last_turn_activated")
        } else {
            0
        };
        let pending = ctx.count("pending_count");
        let energy = ctx.ratio_or("energy_level", 1.0);

        let raw = reward::throughput_bonus(activated)
            + reward::backlog_penalty(pending, self.config.batch_limit * 2)
            + if energy < self.config.energy_floor {
                -0.5
            } else {
                0.0
            };
        let value = reward::clamped(raw);

        let done = acted && ctx.text("last_action_tag") == Some("checkpoint");

        let mut metrics = serde_json::Map::new();
        metrics.insert("activated".to_string(), json!(activated));
        metrics.insert("pending".to_string(), json!(pending));
        metrics.insert("energy".to_string(), json!(energy));

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
