//! Balance chief
//!
//! Keeps shard load spread even: a skewed distribution gets one
//! rebalancing move per turn, and backlog that belongs to the intake
//! domain is deferred there rather than handled locally.
//!
//! Context keys: `shard_loads` (array of numbers), `external_backlog`,
//! `rebalances`.

use async_trait::async_trait;
use sdk::chief::Chief;
use sdk::context::DomainContext;
use sdk::errors::EngineError;
use sdk::types::{
    Action, Capability, Decision, FeatureMap, Observation, Outcome, TrajectoryStep,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::BalanceConfig;
use crate::trajectory::reward;

/// Domain tag
pub const DOMAIN: &str = "balance";

/// Load-distribution controller
pub struct BalanceChief {
    config: BalanceConfig,
}

impl BalanceChief {
    pub fn new(config: BalanceConfig) -> Self {
        Self { config }
    }

    fn loads(ctx: &DomainContext) -> Vec<f64> {
        match ctx.get("shard_loads") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_f64).collect(),
            _ => Vec::new(),
        }
    }

    /// Max/mean load ratio; 1.0 for an empty or idle shard set
    fn skew(loads: &[f64]) -> f64 {
        if loads.is_empty() {
            return 1.0;
        }
        let max = loads.iter().cloned().fold(f64::MIN, f64::max);
        let mean = loads.iter().sum::<f64>() / loads.len() as f64;
        if mean <= 0.0 {
            1.0
        } else {
            max / mean
        }
    }

    /// Indices of the heaviest and lightest shards (first occurrence wins)
    fn extremes(loads: &[f64]) -> Option<(usize, usize)> {
        if loads.len() < 2 {
            return None;
        }
        let mut max_idx = 0;
        let mut min_idx = 0;
        for (idx, load) in loads.iter().enumerate() {
            if *load > loads[max_idx] {
                max_idx = idx;
            }
            if *load < loads[min_idx] {
                min_idx = idx;
            }
        }
        Some((max_idx, min_idx))
    }

    fn features(&self, ctx: &DomainContext) -> FeatureMap {
        let loads = Self::loads(ctx);
        FeatureMap::new()
            .with("shard_count", loads.len() as u64)
            .with("skew", Self::skew(&loads))
            .with("external_backlog", ctx.count("external_backlog"))
            .with("rebalances", ctx.count("rebalances"))
    }
}

#[async_trait]
impl Chief for BalanceChief {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn action_space(&self) -> Vec<Capability> {
        vec![Capability::bare("rebalance", DOMAIN)
            .describe("Move load from the heaviest shard to the lightest")]
    }

    fn observe(&self, ctx: &DomainContext, tick: u64) -> Result<Observation, EngineError> {
        Ok(Observation::new(DOMAIN, self.features(ctx), tick, ctx.rev()))
    }

    fn decide(&self, obs: &Observation) -> Decision {
        let skew = obs.features.ratio_or("skew", 1.0);
        let shard_count = obs.features.count("shard_count");

        if skew > self.config.skew_threshold && shard_count >= 2 {
            return Decision::Act(Action::with_params("rebalance", json!({})));
        }

        // Backlog that belongs to intake goes to intake
        if obs.features.count("external_backlog") > 0 {
            return Decision::Defer {
                domain: "intake".to_string(),
            };
        }

        Decision::Wait { delay_ms: 750 }
    }

    async fn act(&self, action: &Action, ctx: &mut DomainContext) -> Result<(), EngineError> {
        match action.tag.as_str() {
            "rebalance" => {
                let mut loads = Self::loads(ctx);
                let Some((from, to)) = Self::extremes(&loads) else {
                    debug!("rebalance with fewer than two shards is a no-op");
                    return Ok(());
                };
                let moved = (loads[from] - loads[to]) / 2.0;
                loads[from] -= moved;
                loads[to] += moved;

                ctx.set(
                    "shard_loads",
                    Value::Array(loads.into_iter().map(|l| json!(l)).collect()),
                );
                ctx.set("rebalances", ctx.count("rebalances") + 1);
                ctx.set("last_moved", moved);
                debug!(from, to, moved, "rebalanced shard load");
            }
            other => {
                warn!(action = other, "unknown balance action ignored");
                return Ok(());
            }
        }
        ctx.set("last_action_tag", action.tag.clone());
        Ok(())
    }

    fn report(&self, ctx: &DomainContext, obs: &Observation) -> Outcome {
        let acted = ctx.rev() != obs.context_rev;
        let loads = Self::loads(ctx);
        let skew = Self::skew(&loads);

        let raw = if acted {
            // Reward the move, discounted by the skew that remains
            2.0 - (skew - 1.0).min(5.0)
        } else {
            reward::idle_drift(1)
        };
        let value = reward::clamped(raw);

        let mut metrics = serde_json::Map::new();
        metrics.insert("skew".to_string(), json!(skew));
        metrics.insert("rebalances".to_string(), json!(ctx.count("rebalances")));

        let step = TrajectoryStep::new(
            obs.features.clone(),
            Action::bare(ctx.text("last_action_tag").unwrap_or("none")),
            value,
            self.features(ctx),
            false,
        )
        .with_metadata(json!({"domain": DOMAIN}));

        Outcome {
            reward: value,
            metrics,
            step,
        }
    }
}
