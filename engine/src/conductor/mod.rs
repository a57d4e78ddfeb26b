//! Conductor
//!
//! The scheduler at the heart of the engine: it holds a registry of named
//! chiefs and, on every tick, runs each one through its full
//! observe → decide → act → report contract. Chiefs run sequentially in
//! registration order; a failing chief aborts only its own turn.
//!
//! Dynamic dispatch is a name → implementation registry of trait objects,
//! so any new domain controller plugs in by satisfying the contract. All
//! orchestration state lives in this one struct and every mutation goes
//! through an explicit call; there is no ambient global state.

pub mod cycle;
pub mod metrics;

pub use cycle::{TurnRecord, TurnResult, TurnStage};
pub use metrics::{CycleMetrics, MetricsSnapshot};

use sdk::chief::Chief;
use sdk::context::DomainContext;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::bus::{EngineEvent, EventBus};
use crate::heartbeat::Pulse;
use crate::trajectory::TrajectorySink;
use self::cycle::run_turn;

/// One registered chief with its owned domain context
struct ChiefEntry {
    name: String,
    chief: Arc<dyn Chief>,
    context: DomainContext,
    last: Option<TurnRecord>,
}

/// Snapshot of one chief's state, for operators and tests
#[derive(Debug, Clone, Serialize)]
pub struct ChiefState {
    pub name: String,
    pub domain: String,
    pub context: Value,
    pub last: Option<TurnRecord>,
}

/// Summary of one orchestration cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub tick: u64,
    /// True when the conductor was paused and the tick was a no-op
    pub paused: bool,
    pub duration_ms: f64,
    pub actions_taken: u64,
    pub turns: Vec<TurnRecord>,
}

impl CycleReport {
    fn paused_at(tick: u64) -> Self {
        Self {
            tick,
            paused: true,
            duration_ms: 0.0,
            actions_taken: 0,
            turns: Vec::new(),
        }
    }
}

/// The tick-driven multi-chief scheduler
pub struct Conductor {
    entries: Vec<ChiefEntry>,
    sink: Arc<dyn TrajectorySink>,
    bus: EventBus,
    enabled: bool,
    tick_count: u64,
    metrics: CycleMetrics,
}

impl Conductor {
    pub fn new(sink: Arc<dyn TrajectorySink>, ema_alpha: f64) -> Self {
        Self {
            entries: Vec::new(),
            sink,
            bus: EventBus::new(),
            enabled: true,
            tick_count: 0,
            metrics: CycleMetrics::new(ema_alpha),
        }
    }

    /// Handle to the telemetry event bus
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Register a chief under a name
    ///
    /// Exactly one chief is registered per name: re-registration replaces
    /// the implementation in place (keeping registration order and the
    /// accumulated domain context), never duplicates.
    pub async fn register_chief(&mut self, name: impl Into<String>, chief: Arc<dyn Chief>) {
        let name = name.into();
        let domain = chief.domain().to_string();

        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            debug!(name = %name, "replacing registered chief");
            entry.chief = chief;
        } else {
            self.entries.push(ChiefEntry {
                name: name.clone(),
                chief,
                context: DomainContext::new(),
                last: None,
            });
        }

        info!(name = %name, domain = %domain, "chief registered");
        self.bus
            .publish(EngineEvent::ChiefRegistered { name, domain })
            .await;
    }

    /// Remove a chief and its context; returns false when unknown
    pub async fn unregister_chief(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        let removed = self.entries.len() < before;
        if removed {
            info!(name, "chief unregistered");
            self.bus
                .publish(EngineEvent::ChiefUnregistered {
                    name: name.to_string(),
                })
                .await;
        }
        removed
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Registered names in registration order
    pub fn chief_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Stop starting new cycles; per-chief state is retained
    pub async fn pause(&mut self) {
        if self.enabled {
            self.enabled = false;
            info!("conductor paused");
            self.bus.publish(EngineEvent::ConductorPaused).await;
        }
    }

    /// Resume running cycles
    pub async fn resume(&mut self) {
        if !self.enabled {
            self.enabled = true;
            info!("conductor resumed");
            self.bus.publish(EngineEvent::ConductorResumed).await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Immutable view of one chief's domain context
    pub fn context(&self, name: &str) -> Option<&DomainContext> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.context)
    }

    /// Mutable access to one chief's domain context
    ///
    /// For embedders feeding domain state in between ticks; during a cycle
    /// each chief exclusively owns its context.
    pub fn context_mut(&mut self, name: &str) -> Option<&mut DomainContext> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .map(|e| &mut e.context)
    }

    /// Snapshot every chief's context and last turn
    pub fn get_states(&self) -> Vec<ChiefState> {
        self.entries
            .iter()
            .map(|e| ChiefState {
                name: e.name.clone(),
                domain: e.chief.domain().to_string(),
                context: e.context.snapshot(),
                last: e.last.clone(),
            })
            .collect()
    }

    /// Current metrics snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run one orchestration cycle
    ///
    /// Manual entry point for deterministic tests and the `tick` CLI
    /// command; [`Conductor::run`] calls this once per heartbeat pulse.
    pub async fn tick(&mut self) -> CycleReport {
        if !self.enabled {
            trace!("tick ignored while paused");
            return CycleReport::paused_at(self.tick_count);
        }

        self.tick_count += 1;
        let tick = self.tick_count;
        let start = Instant::now();

        let mut actions_taken = 0u64;
        let mut turns = Vec::with_capacity(self.entries.len());
        let mut deferrals: Vec<(String, String)> = Vec::new();
        let sink = Arc::clone(&self.sink);

        for idx in 0..self.entries.len() {
            let chief = Arc::clone(&self.entries[idx].chief);
            let name = self.entries[idx].name.clone();

            let out = run_turn(&name, chief.as_ref(), &mut self.entries[idx].context, tick).await;

            if matches!(out.record.result, TurnResult::Acted { .. }) {
                actions_taken += 1;
            }
            if let Some(step) = &out.step {
                if let Err(e) = sink.record(&name, tick, step).await {
                    warn!(chief = %name, error = %e, "failed to record trajectory step");
                }
            }
            if let Some(target) = out.defer_to {
                deferrals.push((name.clone(), target));
            }

            self.metrics.record_turn(out.record.result.is_ok());
            self.bus
                .publish(EngineEvent::TurnCompleted {
                    chief: name,
                    tick,
                    ok: out.record.result.is_ok(),
                    reward: out.record.result.reward(),
                })
                .await;

            self.entries[idx].last = Some(out.record.clone());
            turns.push(out.record);
        }

        // Deferral notes land after the loop so the target chief sees them
        // on its next natural turn, never mid-cycle.
        for (from, target) in deferrals {
            match self
                .entries
                .iter_mut()
                .find(|e| e.name == target || e.chief.domain() == target)
            {
                Some(entry) => entry.context.note_deferral(from),
                None => warn!(from = %from, target = %target, "deferral to unknown domain"),
            }
        }

        let duration = start.elapsed();
        self.metrics.record_cycle(duration, actions_taken);

        let chiefs = self.chief_names();
        let duration_ms = duration.as_secs_f64() * 1000.0;
        self.bus
            .publish(EngineEvent::CycleCompleted {
                tick,
                duration_ms,
                actions_taken,
                chiefs,
            })
            .await;

        CycleReport {
            tick,
            paused: false,
            duration_ms,
            actions_taken,
            turns,
        }
    }

    /// Drive cycles from a heartbeat subscription until shutdown
    ///
    /// The conductor never sleeps on its own: a pulse runs one cycle, and
    /// a lagged receiver skips missed pulses rather than replaying them.
    pub async fn run(&mut self, mut pulses: broadcast::Receiver<Pulse>, shutdown: Arc<AtomicBool>) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            match pulses.recv().await {
                Ok(pulse) => {
                    trace!(seq = pulse.seq, "pulse received");
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    self.tick().await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "conductor lagged behind the heartbeat");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("heartbeat closed, conductor stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sdk::errors::EngineError;
    use sdk::types::{
        Action, Decision, FeatureMap, Observation, Outcome, TrajectoryStep,
    };

    use crate::trajectory::MemorySink;

    /// Counts turns; optionally fails its observe stage
    struct CountingChief {
        domain: String,
        fail_observe: bool,
    }

    impl CountingChief {
        fn new(domain: &str) -> Self {
            Self {
                domain: domain.to_string(),
                fail_observe: false,
            }
        }

        fn failing(domain: &str) -> Self {
            Self {
                domain: domain.to_string(),
                fail_observe: true,
            }
        }
    }

    #[async_trait]
    impl Chief for CountingChief {
        fn domain(&self) -> &str {
            &self.domain
        }

        fn observe(&self, ctx: &DomainContext, tick: u64) -> Result<Observation, EngineError> {
            if self.fail_observe {
                return Err(EngineError::Observation {
                    chief: self.domain.clone(),
                    detail: "deliberate".to_string(),
                });
            }
            Ok(Observation::new(
                self.domain.clone(),
                FeatureMap::new().with("turns", ctx.count("turns")),
                tick,
                ctx.rev(),
            ))
        }

        fn decide(&self, _obs: &Observation) -> Decision {
            Decision::Act(Action::bare("mark"))
        }

        async fn act(&self, action: &Action, ctx: &mut DomainContext) -> Result<(), EngineError> {
            if action.tag == "mark" {
                let turns = ctx.count("turns");
                ctx.set("turns", turns + 1);
            }
            Ok(())
        }

        fn report(&self, ctx: &DomainContext, obs: &Observation) -> Outcome {
            let step = TrajectoryStep::new(
                obs.features.clone(),
                Action::bare("mark"),
                1.0,
                FeatureMap::new().with("turns", ctx.count("turns")),
                false,
            );
            Outcome {
                reward: 1.0,
                metrics: serde_json::Map::new(),
                step,
            }
        }
    }

    fn conductor_with_sink() -> (Conductor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new(64));
        let conductor = Conductor::new(Arc::clone(&sink) as Arc<dyn TrajectorySink>, 0.2);
        (conductor, sink)
    }

    #[tokio::test]
    async fn test_registration_replaces_never_duplicates() {
        let (mut conductor, _sink) = conductor_with_sink();
        conductor
            .register_chief("alpha", Arc::new(CountingChief::new("alpha")))
            .await;
        conductor
            .register_chief("beta", Arc::new(CountingChief::new("beta")))
            .await;
        conductor
            .register_chief("alpha", Arc::new(CountingChief::new("alpha")))
            .await;

        assert_eq!(conductor.chief_names(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_chiefs_run_in_registration_order() {
        let (mut conductor, _sink) = conductor_with_sink();
        for name in ["zulu", "alpha", "mike"] {
            conductor
                .register_chief(name, Arc::new(CountingChief::new(name)))
                .await;
        }

        let report = conductor.tick().await;
        let order: Vec<&str> = report.turns.iter().map(|t| t.chief.as_str()).collect();
        assert_eq!(order, vec!["zulu", "alpha", "mike"]);
    }

    #[tokio::test]
    async fn test_failing_chief_does_not_abort_cycle() {
        let (mut conductor, sink) = conductor_with_sink();
        conductor
            .register_chief("good-1", Arc::new(CountingChief::new("good-1")))
            .await;
        conductor
            .register_chief("bad", Arc::new(CountingChief::failing("bad")))
            .await;
        conductor
            .register_chief("good-2", Arc::new(CountingChief::new("good-2")))
            .await;

        let report = conductor.tick().await;

        assert_eq!(report.turns.len(), 3);
        assert!(report.turns[0].result.is_ok());
        assert!(!report.turns[1].result.is_ok());
        assert!(report.turns[2].result.is_ok());
        // Failing chief contributes zero actions
        assert_eq!(report.actions_taken, 2);
        // Only successful turns record trajectory steps
        assert_eq!(sink.len().await, 2);
    }

    #[tokio::test]
    async fn test_paused_tick_is_noop_and_state_retained() {
        let (mut conductor, _sink) = conductor_with_sink();
        conductor
            .register_chief("alpha", Arc::new(CountingChief::new("alpha")))
            .await;

        conductor.tick().await;
        assert_eq!(conductor.context("alpha").unwrap().count("turns"), 1);

        conductor.pause().await;
        let report = conductor.tick().await;
        assert!(report.paused);
        assert!(report.turns.is_empty());
        // State from the last successful cycle is retained
        assert_eq!(conductor.context("alpha").unwrap().count("turns"), 1);
        assert_eq!(conductor.tick_count(), 1);

        conductor.resume().await;
        conductor.tick().await;
        assert_eq!(conductor.context("alpha").unwrap().count("turns"), 2);
    }

    #[tokio::test]
    async fn test_unregister_removes_chief() {
        let (mut conductor, _sink) = conductor_with_sink();
        conductor
            .register_chief("alpha", Arc::new(CountingChief::new("alpha")))
            .await;

        assert!(conductor.unregister_chief("alpha").await);
        assert!(!conductor.unregister_chief("alpha").await);
        assert!(conductor.chief_names().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_accumulate_across_cycles() {
        let (mut conductor, _sink) = conductor_with_sink();
        conductor
            .register_chief("alpha", Arc::new(CountingChief::new("alpha")))
            .await;

        conductor.tick().await;
        conductor.tick().await;

        let metrics = conductor.metrics();
        assert_eq!(metrics.cycles, 2);
        assert_eq!(metrics.total_actions, 2);
        assert_eq!(metrics.total_turns, 2);
        assert!(metrics.ema_cycle_ms.is_some());
    }

    #[tokio::test]
    async fn test_get_states_snapshots_contexts() {
        let (mut conductor, _sink) = conductor_with_sink();
        conductor
            .register_chief("alpha", Arc::new(CountingChief::new("alpha")))
            .await;
        conductor.tick().await;

        let states = conductor.get_states();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].name, "alpha");
        assert_eq!(states[0].domain, "alpha");
        assert!(states[0].last.is_some());
        assert_eq!(states[0].context["values"]["turns"], 1);
    }
}
