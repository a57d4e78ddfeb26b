use proptest::prelude::*;
use sdk::errors::{EngineError, MaestroErrorExt};
use sdk::types::{
    Action, Capability, FeatureMap, TrajectoryStep, REWARD_CEIL, REWARD_FLOOR,
};

proptest! {
    /// Every error variant carries a non-empty operator hint, whatever the
    /// embedded detail string contains
    #[test]
    fn error_operator_hints_are_always_present(detail in "\\PC*", name in "[a-z]{1,16}") {
        let errs = vec![
            EngineError::Observation { chief: name.clone(), detail: detail.clone() },
            EngineError::Decision { chief: name.clone(), detail: detail.clone() },
            EngineError::Action {
                chief: name.clone(),
                action: name.clone(),
                detail: detail.clone(),
            },
            EngineError::Expand { node: name.clone(), detail: detail.clone() },
            EngineError::Step { node: name.clone(), detail: detail.clone() },
            EngineError::Storage(detail.clone()),
            EngineError::Database(detail.clone()),
            EngineError::Config(detail.clone()),
            EngineError::Heartbeat(detail.clone()),
        ];

        for err in errs {
            prop_assert!(!err.operator_hint().is_empty());
        }
    }

    /// Turn- and node-scoped failures are recoverable, ambient failures
    /// are not
    #[test]
    fn recoverability_follows_the_failure_scope(detail in "\\PC*", name in "[a-z]{1,16}") {
        let observation_recoverable = EngineError::Observation {
            chief: name.clone(),
            detail: detail.clone(),
        }
        .is_recoverable();
        prop_assert!(observation_recoverable);
        let step_recoverable = EngineError::Step {
            node: name.clone(),
            detail: detail.clone(),
        }
        .is_recoverable();
        prop_assert!(step_recoverable);
        prop_assert!(!EngineError::Database(detail.clone()).is_recoverable());
        prop_assert!(!EngineError::Config(detail).is_recoverable());
    }

    /// Trajectory rewards are clamped into the stable range for any input
    #[test]
    fn trajectory_rewards_are_clamped(raw in proptest::num::f64::ANY) {
        let step = TrajectoryStep::new(
            FeatureMap::new(),
            Action::bare("x"),
            raw,
            FeatureMap::new(),
            false,
        );
        prop_assert!(step.reward.is_finite());
        prop_assert!(step.reward >= REWARD_FLOOR);
        prop_assert!(step.reward <= REWARD_CEIL);
    }

    /// A capability without a schema accepts any action with the same tag
    /// and rejects every other tag
    #[test]
    fn bare_capabilities_match_on_tag_only(tag in "[a-z_]{1,20}", other in "[A-Z]{1,20}") {
        let cap = Capability::bare(tag.clone(), "domain");
        prop_assert!(cap.matches(&Action::bare(tag.clone())));
        let matches_params = cap.matches(&Action::with_params(tag, serde_json::json!({"any": 1})));
        prop_assert!(matches_params);
        prop_assert!(!cap.matches(&Action::bare(other)));
    }

    /// Actions and trajectory steps survive a serde round trip unchanged
    #[test]
    fn step_serde_round_trip(
        tag in "[a-z_]{1,20}",
        reward in -30.0f64..30.0,
        count in 0u64..100_000,
        done in proptest::bool::ANY,
    ) {
        let step = TrajectoryStep::new(
            FeatureMap::new().with("count", count),
            Action::with_params(tag, serde_json::json!({"count": count})),
            reward,
            FeatureMap::new().with("count", count + 1),
            done,
        );

        let encoded = serde_json::to_string(&step).expect("serialize");
        let decoded: TrajectoryStep = serde_json::from_str(&encoded).expect("deserialize");
        prop_assert_eq!(step, decoded);
    }
}
