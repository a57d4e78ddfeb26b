//! Built-in chiefs
//!
//! Five domain controllers ship with the engine, each an instance of the
//! same ordered decision cascade with its own thresholds, feature names,
//! and action vocabulary. They double as working references for external
//! chief implementations.

pub mod balance;
pub mod intake;
pub mod lineage;
pub mod mission;
pub mod replay;

pub use balance::BalanceChief;
pub use intake::IntakeChief;
pub use lineage::LineageChief;
pub use mission::MissionChief;
pub use replay::ReplayChief;

use sdk::chief::Chief;
use std::sync::Arc;
use tracing::warn;

use crate::bus::EventBus;
use crate::config::Config;
use crate::plan::engine::PlanEngine;
use crate::plan::store::PlanStore;
use crate::trajectory::TrajectorySink;

/// Construct the chiefs enabled in the configuration, in config order
///
/// The mission chief gets a plan engine over `store`; when `node_sink` is
/// set, plan-node completions are recorded there as trajectory steps, and
/// when `bus` is set, stall recoveries and tree completions are published
/// as engine events.
pub fn built_in_chiefs(
    config: &Config,
    store: Arc<dyn PlanStore>,
    node_sink: Option<Arc<dyn TrajectorySink>>,
    bus: Option<EventBus>,
) -> Vec<(String, Arc<dyn Chief>)> {
    let mut chiefs: Vec<(String, Arc<dyn Chief>)> = Vec::new();

    for name in &config.chiefs.enabled {
        let chief: Arc<dyn Chief> = match name.as_str() {
            intake::DOMAIN => Arc::new(IntakeChief::new(config.chiefs.intake.clone())),
            lineage::DOMAIN => Arc::new(LineageChief::new(config.chiefs.lineage.clone())),
            mission::DOMAIN => {
                let mut engine = PlanEngine::new(Arc::clone(&store), &config.plan);
                if let Some(sink) = &node_sink {
                    engine = engine.with_sink(Arc::clone(sink));
                }
                if let Some(bus) = &bus {
                    engine = engine.with_bus(bus.clone());
                }
                Arc::new(MissionChief::new(engine))
            }
            replay::DOMAIN => Arc::new(ReplayChief::new(config.chiefs.replay.clone())),
            balance::DOMAIN => Arc::new(BalanceChief::new(config.chiefs.balance.clone())),
            other => {
                warn!(chief = other, "unknown chief in config, skipping");
                continue;
            }
        };
        chiefs.push((name.clone(), chief));
    }

    chiefs
}
