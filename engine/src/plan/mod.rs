//! Plan Tree Engine
//!
//! Hierarchical decomposition and execution primitive available to any
//! plan-aware chief: a goal becomes a tree of composite nodes (expandable
//! into children) and leaf nodes (directly executable steps), scheduled by
//! priority with stall detection and recovery.

pub mod engine;
pub mod store;
pub mod types;

pub use engine::{PassAction, PassReport, PlanEngine};
pub use store::{MemoryPlanStore, PlanStore};
pub use types::{NodeStatus, PlanNode, PlanTree, TreeStatus};
