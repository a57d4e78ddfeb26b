//! Cycle metrics
//!
//! Aggregates after every orchestration cycle: an exponential moving
//! average over cycle duration and running totals for turns and actions.
//! A snapshot is published on the event bus after each cycle.

use serde::Serialize;
use std::time::Duration;

/// Running aggregates over orchestration cycles
#[derive(Debug, Clone)]
pub struct CycleMetrics {
    alpha: f64,
    cycles: u64,
    ema_cycle_ms: Option<f64>,
    total_actions: u64,
    total_turns: u64,
    failed_turns: u64,
}

/// Serializable point-in-time view of the metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    /// Smoothed cycle duration in milliseconds; None before the first cycle
    pub ema_cycle_ms: Option<f64>,
    pub total_actions: u64,
    pub total_turns: u64,
    pub failed_turns: u64,
}

impl CycleMetrics {
    /// Create metrics with the given EMA smoothing factor (0, 1]
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            cycles: 0,
            ema_cycle_ms: None,
            total_actions: 0,
            total_turns: 0,
            failed_turns: 0,
        }
    }

    /// Record one finished cycle
    pub fn record_cycle(&mut self, duration: Duration, actions_taken: u64) {
        let sample = duration.as_secs_f64() * 1000.0;
        self.cycles += 1;
        self.total_actions += actions_taken;
        self.ema_cycle_ms = Some(match self.ema_cycle_ms {
            None => sample,
            Some(ema) => self.alpha * sample + (1.0 - self.alpha) * ema,
        });
    }

    /// Record one chief turn
    pub fn record_turn(&mut self, ok: bool) {
        self.total_turns += 1;
        if !ok {
            self.failed_turns += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles,
            ema_cycle_ms: self.ema_cycle_ms,
            total_actions: self.total_actions,
            total_turns: self.total_turns,
            failed_turns: self.failed_turns,
        }
    }
}
