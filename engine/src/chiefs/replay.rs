//! Replay chief
//!
//! Handles long-running replay work without ever blocking a turn: a
//! requested replay is started as a detached background task that works
//! through a bounded budget and then terminates itself, and later turns
//! poll its progress through shared counters. There is no cancellation
//! primitive; the budget is the only bound.
//!
//! Context keys: `replay_requested`, `replay_window`, `replay_active`,
//! `replay_progress`, `replay_total`, `replays_completed`.

use async_trait::async_trait;
use sdk::chief::Chief;
use sdk::context::DomainContext;
use sdk::errors::EngineError;
use sdk::types::{
    Action, Capability, Decision, FeatureMap, Observation, Outcome, TrajectoryStep,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ReplayConfig;
use crate::trajectory::reward;

/// Domain tag
pub const DOMAIN: &str = "replay";

/// One background replay job
struct ReplayJob {
    progress: Arc<AtomicU64>,
    total: u64,
}

/// Background-replay controller
pub struct ReplayChief {
    config: ReplayConfig,
    jobs: Mutex<HashMap<String, ReplayJob>>,
}

impl ReplayChief {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn features(&self, ctx: &DomainContext) -> FeatureMap {
        let total = ctx.count("replay_total");
        let progress = ctx.count("replay_progress");
        let completion = if total > 0 {
            progress as f64 / total as f64
        } else {
            0.0
        };
        FeatureMap::new()
            .with("replay_requested", ctx.flag("replay_requested"))
            .with("replay_active", ctx.flag("replay_active"))
            .with("replay_completion", completion)
            .with("replays_completed", ctx.count("replays_completed"))
    }

    fn job_progress(&self, id: &str) -> Option<(u64, u64)> {
        let jobs = self.jobs.lock().ok()?;
        jobs.get(id)
            .map(|job| (job.progress.load(Ordering::Relaxed), job.total))
    }

    fn start_job(&self, budget: u64) -> Result<String, EngineError> {
        let id = Uuid::new_v4().to_string();
        let progress = Arc::new(AtomicU64::new(0));
        let worker = Arc::clone(&progress);

        // Detached task: it owns its budget and terminates itself; the
        // engine only ever reads the shared counter.
        let _worker = tokio::spawn(async move {
            for unit in 0..budget {
                worker.store(unit + 1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        });

        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| EngineError::Storage("replay job table poisoned".to_string()))?;
        jobs.insert(
            id.clone(),
            ReplayJob {
                progress,
                total: budget,
            },
        );
        Ok(id)
    }

    fn drop_job(&self, id: &str) {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.remove(id);
        }
    }
}

#[async_trait]
impl Chief for ReplayChief {
    fn domain(&self) -> &str {
        DOMAIN
    }

    fn action_space(&self) -> Vec<Capability> {
        vec![
            Capability::bare("start_replay", DOMAIN)
                .describe("Launch a bounded background replay")
                .with_schema(json!({"tick": "number"})),
            Capability::bare("poll_replay", DOMAIN)
                .describe("Copy background replay progress into the context")
                .with_schema(json!({"tick": "number"})),
        ]
    }

    fn observe(&self, ctx: &DomainContext, tick: u64) -> Result<Observation, EngineError> {
        Ok(Observation::new(DOMAIN, self.features(ctx), tick, ctx.rev()))
    }

    fn decide(&self, obs: &Observation) -> Decision {
        let requested = obs.features.flag("replay_requested");
        let active = obs.features.flag("replay_active");

        if requested && !active {
            return Decision::Act(Action::with_params(
                "start_replay",
                json!({"tick": obs.tick}),
            ));
        }
        if active {
            return Decision::Act(Action::with_params(
                "poll_replay",
                json!({"tick": obs.tick}),
            ));
        }
        Decision::Wait { delay_ms: 1500 }
    }

    async fn act(&self, action: &Action, ctx: &mut DomainContext) -> Result<(), EngineError> {
        match action.tag.as_str() {
            "start_replay" => {
                let budget = match ctx.count("replay_window") {
                    0 => self.config.budget_steps,
                    window => window.min(self.config.budget_steps),
                };
                let id = self.start_job(budget)?;
                debug!(job = %id, budget, "replay started");

                ctx.set("replay_requested", false);
                ctx.set("replay_active", true);
                ctx.set("replay_id", id);
                ctx.set("replay_total", budget);
                ctx.set("replay_progress", 0u64);
                ctx.set("replay_finished_now", false);
            }
            "poll_replay" => {
                let id = ctx.text("replay_id").unwrap_or_default().to_string();
                match self.job_progress(&id) {
                    Some((progress, total)) => {
                        ctx.set("replay_progress", progress);
                        if progress >= total {
                            self.drop_job(&id);
                            ctx.set("replay_active", false);
                            ctx.set("replays_completed", ctx.count("replays_completed") + 1);
                            ctx.set("replay_finished_now", true);
                            debug!(job = %id, "replay finished");
                        } else {
                            ctx.set("replay_finished_now", false);
                        }
                    }
                    None => {
                        // Job table lost the entry; treat the replay as gone
                        warn!(job = %id, "polled unknown replay job");
                        ctx.set("replay_active", false);
                        ctx.set("replay_finished_now", false);
                    }
                }
            }
            other => {
                warn!(action = other, "unknown replay action ignored");
                return Ok(());
            }
        }
        ctx.set("last_action_tag", action.tag.clone());
        Ok(())
    }

    fn report(&self, ctx: &DomainContext, obs: &Observation) -> Outcome {
        let acted = ctx.rev() != obs.context_rev;
        let finished_now = acted && ctx.flag("replay_finished_now");

        let raw = if finished_now {
            reward::throughput_bonus(3)
        } else if acted {
            0.5
        } else {
            reward::idle_drift(1)
        };
        let value = reward::clamped(raw);

        let mut metrics = serde_json::Map::new();
        metrics.insert(
            "replays_completed".to_string(),
            json!(ctx.count("replays_completed")),
        );
        metrics.insert("active".to_string(), json!(ctx.flag("replay_active")));

        let step = TrajectoryStep::new(
            obs.features.clone(),
            Action::bare(ctx.text("last_action_tag").unwrap_or("none")),
            value,
            self.features(ctx),
            finished_now,
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

    fn chief() -> ReplayChief {
        ReplayChief::new(ReplayConfig { budget_steps: 8 })
    }

    #[test]
    fn test_requested_replay_starts() {
        let c = chief();
        let mut ctx = DomainContext::new();
        ctx.set("replay_requested", true);

        let obs = c.observe(&ctx, 1).unwrap();
        match c.decide(&obs) {
            Decision::Act(action) => assert_eq!(action.tag, "start_replay"),
            other => panic!("expected start_replay, got {:?}", other),
        }
    }

    #[test]
    fn test_active_replay_is_polled() {
        let c = chief();
        let mut ctx = DomainContext::new();
        ctx.set("replay_active", true);

        let obs = c.observe(&ctx, 1).unwrap();
        match c.decide(&obs) {
            Decision::Act(action) => assert_eq!(action.tag, "poll_replay"),
            other => panic!("expected poll_replay, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_waits() {
        let c = chief();
        let ctx = DomainContext::new();
        let obs = c.observe(&ctx, 1).unwrap();
        assert_eq!(c.decide(&obs), Decision::Wait { delay_ms: 1500 });
    }

    #[tokio::test]
    async fn test_replay_runs_to_completion_across_polls() {
        let c = chief();
        let mut ctx = DomainContext::new();
        ctx.set("replay_requested", true);

        c.act(
            &Action::with_params("start_replay", json!({"tick": 1})),
            &mut ctx,
        )
        .await
        .unwrap();
        assert!(ctx.flag("replay_active"));
        assert!(!ctx.flag("replay_requested"));

        // Poll until the self-terminating job finishes its budget
        let mut finished = false;
        for tick in 2..50u64 {
            tokio::task::yield_now().await;
            c.act(
                &Action::with_params("poll_replay", json!({"tick": tick})),
                &mut ctx,
            )
            .await
            .unwrap();
            if !ctx.flag("replay_active") {
                finished = true;
                break;
            }
        }

        assert!(finished, "replay never completed its budget");
        assert_eq!(ctx.count("replays_completed"), 1);
        assert_eq!(ctx.count("replay_progress"), 8);
        assert!(ctx.flag("replay_finished_now"));
    }

    #[tokio::test]
    async fn test_window_caps_at_config_budget() {
        let c = chief();
        let mut ctx = DomainContext::new();
        ctx.set("replay_requested", true);
        ctx.set("replay_window", 1000u64);

        c.act(
            &Action::with_params("start_replay", json!({"tick": 1})),
            &mut ctx,
        )
        .await
        .unwrap();

        assert_eq!(ctx.count("replay_total"), 8);
    }
}
