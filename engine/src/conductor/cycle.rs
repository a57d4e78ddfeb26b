//! One chief turn
//!
//! Drives a single chief through observe → decide → act → report with an
//! error boundary around every stage: a returned error or a panic aborts
//! only that chief's turn, tagged with the stage it failed at. The rest of
//! the cycle is unaffected.
//!
//! Wait and defer decisions skip the act stage but still run report, so
//! every successful turn yields exactly one trajectory step. The recorded
//! step's action is normalized to the decision actually taken (the
//! executed action, or a synthetic `wait` / `defer`), whatever the
//! chief's report built.

use futures::FutureExt;
use sdk::chief::Chief;
use sdk::context::DomainContext;
use sdk::types::{Action, Decision, Outcome, TrajectoryStep};
use serde::Serialize;
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Stage of the contract a turn failed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStage {
    Observe,
    Decide,
    Act,
    Report,
}

/// Result of one chief turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TurnResult {
    /// An action was executed
    Acted {
        action: Action,
        reward: f64,
        /// False when the chief declared an action space and the action
        /// fell outside it
        conformant: bool,
    },
    /// The chief chose to wait
    Waited { delay_ms: u64, reward: f64 },
    /// The chief deferred to another domain
    Deferred { to: String, reward: f64 },
    /// The turn aborted at a stage
    Failed { stage: TurnStage, error: String },
}

impl TurnResult {
    pub fn is_ok(&self) -> bool {
        !matches!(self, TurnResult::Failed { .. })
    }

    pub fn reward(&self) -> f64 {
        match self {
            TurnResult::Acted { reward, .. }
            | TurnResult::Waited { reward, .. }
            | TurnResult::Deferred { reward, .. } => *reward,
            TurnResult::Failed { .. } => 0.0,
        }
    }
}

/// One chief turn as recorded by the conductor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnRecord {
    pub chief: String,
    pub tick: u64,
    #[serde(flatten)]
    pub result: TurnResult,
}

/// Full output of one turn, consumed by the cycle loop
pub(crate) struct TurnOutput {
    pub record: TurnRecord,
    /// Trajectory step for successful turns
    pub step: Option<TrajectoryStep>,
    /// Target domain of a defer decision
    pub defer_to: Option<String>,
}

impl TurnOutput {
    fn failed(chief: &str, tick: u64, stage: TurnStage, error: String) -> Self {
        warn!(chief, ?stage, %error, "chief turn aborted");
        Self {
            record: TurnRecord {
                chief: chief.to_string(),
                tick,
                result: TurnResult::Failed { stage, error },
            },
            step: None,
            defer_to: None,
        }
    }
}

/// Extract a readable message from a panic payload
fn panic_detail(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Run one chief through its full contract
pub(crate) async fn run_turn(
    name: &str,
    chief: &dyn Chief,
    ctx: &mut DomainContext,
    tick: u64,
) -> TurnOutput {
    // Observe
    let obs = match catch_unwind(AssertUnwindSafe(|| chief.observe(ctx, tick))) {
        Ok(Ok(obs)) => obs,
        Ok(Err(e)) => return TurnOutput::failed(name, tick, TurnStage::Observe, e.to_string()),
        Err(payload) => {
            return TurnOutput::failed(name, tick, TurnStage::Observe, panic_detail(payload))
        }
    };

    // Decide
    let decision = match catch_unwind(AssertUnwindSafe(|| chief.decide(&obs))) {
        Ok(decision) => decision,
        Err(payload) => {
            return TurnOutput::failed(name, tick, TurnStage::Decide, panic_detail(payload))
        }
    };

    match decision {
        Decision::Act(action) => {
            let conformant = {
                let space = chief.action_space();
                space.is_empty() || space.iter().any(|cap| cap.matches(&action))
            };
            if !conformant {
                warn!(
                    chief = name,
                    action = %action.tag,
                    "action outside the declared action space"
                );
            }

            // Act: the only stage allowed to mutate domain state
            let act_result = AssertUnwindSafe(chief.act(&action, ctx)).catch_unwind().await;
            match act_result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return TurnOutput::failed(name, tick, TurnStage::Act, e.to_string())
                }
                Err(payload) => {
                    return TurnOutput::failed(name, tick, TurnStage::Act, panic_detail(payload))
                }
            }

            let outcome = match report(chief, ctx, &obs) {
                Ok(outcome) => outcome,
                Err(detail) => return TurnOutput::failed(name, tick, TurnStage::Report, detail),
            };
            let mut step = outcome.step;
            step.action = action.clone();

            TurnOutput {
                record: TurnRecord {
                    chief: name.to_string(),
                    tick,
                    result: TurnResult::Acted {
                        action,
                        reward: step.reward,
                        conformant,
                    },
                },
                step: Some(step),
                defer_to: None,
            }
        }

        Decision::Wait { delay_ms } => {
            // Report before recording the wait, so a chief comparing the
            // context revision against its observation still sees an
            // untouched context for a turn that took no action.
            let outcome = match report(chief, ctx, &obs) {
                Ok(outcome) => outcome,
                Err(detail) => return TurnOutput::failed(name, tick, TurnStage::Report, detail),
            };
            ctx.set_wait(tick, delay_ms);
            let mut step = outcome.step;
            step.action = Action::with_params("wait", json!({"delay_ms": delay_ms}));

            TurnOutput {
                record: TurnRecord {
                    chief: name.to_string(),
                    tick,
                    result: TurnResult::Waited {
                        delay_ms,
                        reward: step.reward,
                    },
                },
                step: Some(step),
                defer_to: None,
            }
        }

        Decision::Defer { domain } => {
            let outcome = match report(chief, ctx, &obs) {
                Ok(outcome) => outcome,
                Err(detail) => return TurnOutput::failed(name, tick, TurnStage::Report, detail),
            };
            let mut step = outcome.step;
            step.action = Action::with_params("defer", json!({"domain": domain}));

            TurnOutput {
                record: TurnRecord {
                    chief: name.to_string(),
                    tick,
                    result: TurnResult::Deferred {
                        to: domain.clone(),
                        reward: step.reward,
                    },
                },
                step: Some(step),
                defer_to: Some(domain),
            }
        }
    }
}

/// Report with a panic boundary
fn report(
    chief: &dyn Chief,
    ctx: &DomainContext,
    obs: &sdk::types::Observation,
) -> Result<Outcome, String> {
    catch_unwind(AssertUnwindSafe(|| chief.report(ctx, obs))).map_err(panic_detail)
}
