//! Maestro SDK
//!
//! Shared library providing the chief contract, the value types that cross
//! it, and the error taxonomy. This crate is the only thing a domain
//! controller needs to compile against; the engine crate depends on it the
//! same way external chiefs do.

/// Chief trait
pub mod chief;

/// Domain context container
pub mod context;

/// Error types and handling
pub mod errors;

/// Observation, action, and trajectory types
pub mod types;

// Re-export commonly used types
pub use chief::Chief;
pub use context::{DomainContext, WaitState};
pub use errors::{EngineError, MaestroErrorExt};
pub use types::{
    Action, Capability, Decision, Expansion, FeatureMap, NodeKind, NodeSeed, Observation, Outcome,
    PlanNodeRef, StepResult, StepStatus, TrajectoryStep, REWARD_CEIL, REWARD_FLOOR,
};
