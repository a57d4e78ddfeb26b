//! Trajectory recorder
//!
//! Captures one `(state, action, reward, next-state)` tuple per successful
//! chief turn, keyed by `(chief, tick)`, for consumption by an external
//! learning system. The recorder is a pure sink: append-only, with no
//! feedback into the current cycle — rewards are strictly retrospective.

pub mod reward;

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::TrajectoryStep;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// One recorded step with its routing key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedStep {
    /// Name the chief is registered under
    pub chief: String,

    /// Tick the step was produced at
    pub tick: u64,

    /// The recorded transition
    pub step: TrajectoryStep,
}

/// Append-only trajectory sink
///
/// Steps for one chief arrive strictly tick-ordered; no ordering holds
/// between different chiefs' steps.
#[async_trait]
pub trait TrajectorySink: Send + Sync {
    /// Append one step
    async fn record(&self, chief: &str, tick: u64, step: &TrajectoryStep)
        -> Result<(), EngineError>;
}

/// Bounded in-memory sink
///
/// Keeps the most recent `capacity` steps in a ring buffer. Used by tests
/// and by embedders that ship steps elsewhere themselves.
pub struct MemorySink {
    capacity: usize,
    entries: Mutex<VecDeque<RecordedStep>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of retained steps
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// The most recent `limit` steps, newest last
    pub async fn recent(&self, limit: usize) -> Vec<RecordedStep> {
        let entries = self.entries.lock().await;
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// All retained steps for one chief, in record order
    pub async fn steps_for(&self, chief: &str) -> Vec<RecordedStep> {
        let entries = self.entries.lock().await;
        entries.iter().filter(|e| e.chief == chief).cloned().collect()
    }
}

#[async_trait]
impl TrajectorySink for MemorySink {
    async fn record(
        &self,
        chief: &str,
        tick: u64,
        step: &TrajectoryStep,
    ) -> Result<(), EngineError> {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(RecordedStep {
            chief: chief.to_string(),
            tick,
            step: step.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::types::{Action, FeatureMap};

    fn step(reward: f64) -> TrajectoryStep {
        TrajectoryStep::new(
            FeatureMap::new(),
            Action::bare("noop"),
            reward,
            FeatureMap::new(),
            false,
        )
    }

    #[tokio::test]
    async fn test_record_and_recent() {
        let sink = MemorySink::new(10);
        sink.record("intake", 1, &step(1.0)).await.unwrap();
        sink.record("intake", 2, &step(2.0)).await.unwrap();
        sink.record("balance", 2, &step(-1.0)).await.unwrap();

        assert_eq!(sink.len().await, 3);

        let recent = sink.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].chief, "intake");
        assert_eq!(recent[0].tick, 2);
        assert_eq!(recent[1].chief, "balance");
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let sink = MemorySink::new(2);
        sink.record("a", 1, &step(0.0)).await.unwrap();
        sink.record("a", 2, &step(0.0)).await.unwrap();
        sink.record("a", 3, &step(0.0)).await.unwrap();

        let steps = sink.steps_for("a").await;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].tick, 2);
        assert_eq!(steps[1].tick, 3);
    }

    #[tokio::test]
    async fn test_per_chief_steps_stay_tick_ordered() {
        let sink = MemorySink::new(16);
        for tick in 1..=5u64 {
            sink.record("intake", tick, &step(0.5)).await.unwrap();
            sink.record("lineage", tick, &step(-0.5)).await.unwrap();
        }

        let intake = sink.steps_for("intake").await;
        let ticks: Vec<u64> = intake.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![1, 2, 3, 4, 5]);
    }
}
