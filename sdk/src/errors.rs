//! Error types and handling
//!
//! This module provides the error types shared by the Maestro engine and
//! every chief implementation. Contract-call failures carry the chief name
//! (or plan-node id) they occurred in, so the conductor can log the failure
//! point without unwinding the rest of the cycle.
//!
//! An action outside a chief's known set is deliberately *not* represented
//! here: unknown actions are a logged no-op path, never an error.

use thiserror::Error;

/// Trait for Maestro error extensions
///
/// Provides additional context for errors: a short operator-facing hint and
/// whether the error is recoverable. Recoverable errors abort one chief's
/// turn or one plan node; non-recoverable ones mean the engine cannot keep
/// its persistence or configuration guarantees.
pub trait MaestroErrorExt {
    /// Returns a short operator-facing hint for the error
    fn operator_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are absorbed at the conductor boundary and retried
    /// naturally on a later tick. Non-recoverable errors typically require
    /// manual intervention (bad config, broken storage).
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// The first five variants map to the contract-call failure taxonomy:
/// observation, decision, and action failures are tagged with the chief
/// name; expansion and step failures are tagged with the plan-node id.
/// The remaining variants cover the ambient concerns (storage, config,
/// heartbeat plumbing).
#[derive(Debug, Error)]
pub enum EngineError {
    /// A chief's observe call failed or panicked
    #[error("Observation failed for chief '{chief}': {detail}")]
    Observation { chief: String, detail: String },

    /// A chief's decide call failed or panicked
    #[error("Decision failed for chief '{chief}': {detail}")]
    Decision { chief: String, detail: String },

    /// A chief's act call failed for a specific action
    #[error("Action '{action}' failed for chief '{chief}': {detail}")]
    Action {
        chief: String,
        action: String,
        detail: String,
    },

    /// Expanding a composite plan node failed
    #[error("Expansion failed for node {node}: {detail}")]
    Expand { node: String, detail: String },

    /// Performing a leaf plan node failed
    #[error("Step failed for node {node}: {detail}")]
    Step { node: String, detail: String },

    /// A chief was addressed that is not registered
    #[error("Chief not registered: {0}")]
    UnknownChief(String),

    /// A plan tree or node id did not resolve
    #[error("Plan entity not found: {0}")]
    PlanNotFound(String),

    // Ambient errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Heartbeat error: {0}")]
    Heartbeat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MaestroErrorExt for EngineError {
    fn operator_hint(&self) -> &str {
        match self {
            EngineError::Observation { .. } => {
                "The chief could not snapshot its domain; its turn was skipped this tick"
            }
            EngineError::Decision { .. } => {
                "The chief could not choose an action; its turn was skipped this tick"
            }
            EngineError::Action { .. } => {
                "The chief's action failed; its turn was aborted this tick"
            }
            EngineError::Expand { .. } => {
                "A composite plan node could not be expanded and was marked failed"
            }
            EngineError::Step { .. } => "A leaf plan node failed and was marked failed",
            EngineError::UnknownChief(_) => "Register the chief before addressing it",
            EngineError::PlanNotFound(_) => "The plan tree or node no longer exists",
            EngineError::Storage(_) | EngineError::Database(_) => {
                "Check the data directory and database file permissions"
            }
            EngineError::Config(_) => "Check ~/.maestro/config.toml for invalid values",
            EngineError::Heartbeat(_) => "The tick signal was interrupted; restart the engine",
            EngineError::Serialization(_) => "A payload could not be encoded or decoded",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Turn-scoped and node-scoped failures resolve on a later tick
            EngineError::Observation { .. }
            | EngineError::Decision { .. }
            | EngineError::Action { .. }
            | EngineError::Expand { .. }
            | EngineError::Step { .. }
            | EngineError::UnknownChief(_)
            | EngineError::PlanNotFound(_) => true,

            // Broken storage or config needs manual intervention
            EngineError::Storage(_)
            | EngineError::Database(_)
            | EngineError::Config(_)
            | EngineError::Serialization(_) => false,

            EngineError::Heartbeat(_) => false,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
