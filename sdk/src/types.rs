//! Observation, action, and trajectory types
//!
//! These are the value types that cross the chief contract: feature
//! snapshots going in, decisions coming out, and trajectory steps flowing
//! to the recorder. Everything here is plain serde data; nothing holds a
//! live reference into mutable domain state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lower bound for a trajectory reward
pub const REWARD_FLOOR: f64 = -20.0;

/// Upper bound for a trajectory reward
pub const REWARD_CEIL: f64 = 20.0;

/// A flat map of observed domain features
///
/// Features hold only primitive or composite values (counts, ratios,
/// booleans, nested maps), never references into the domain context they
/// were derived from. Two observations of identical context state compare
/// equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureMap(Map<String, Value>);

impl FeatureMap {
    /// Create an empty feature map
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a feature
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get a raw feature value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a count feature, defaulting to 0 when absent
    pub fn count(&self, key: &str) -> u64 {
        self.0.get(key).and_then(Value::as_u64).unwrap_or(0)
    }

    /// Get a ratio feature, defaulting to `default` when absent
    pub fn ratio_or(&self, key: &str, default: f64) -> f64 {
        self.0.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    /// Get a boolean feature, defaulting to false when absent
    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Get a text feature
    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An immutable snapshot of one chief's domain at one tick
///
/// `context_rev` is the revision counter of the [`crate::context::DomainContext`]
/// the snapshot was taken from, so a consumer can tell whether the context
/// changed between observation and report without holding a reference to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Domain tag of the observing chief
    pub domain: String,

    /// Observed features
    pub features: FeatureMap,

    /// Tick the snapshot was taken at
    pub tick: u64,

    /// Revision of the source context at snapshot time
    pub context_rev: u64,
}

impl Observation {
    pub fn new(domain: impl Into<String>, features: FeatureMap, tick: u64, context_rev: u64) -> Self {
        Self {
            domain: domain.into(),
            features,
            tick,
            context_rev,
        }
    }
}

/// An action a chief wants executed
///
/// Either a bare symbolic tag (`params` is null) or a tagged action with a
/// JSON parameter object. The pending/executing/completed lifecycle is
/// tracked by the conductor's turn record, not by this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Symbolic action tag, e.g. `activate_pending` or `checkpoint`
    pub tag: String,

    /// Action parameters; `Value::Null` for bare tags
    #[serde(default)]
    pub params: Value,
}

impl Action {
    /// Create a bare symbolic action
    pub fn bare(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            params: Value::Null,
        }
    }

    /// Create a tagged action with parameters
    pub fn with_params(tag: impl Into<String>, params: Value) -> Self {
        Self {
            tag: tag.into(),
            params,
        }
    }

    /// Whether this is a bare tag with no parameters
    pub fn is_bare(&self) -> bool {
        self.params.is_null()
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Get an integer parameter
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }
}

/// Output of a chief's decide call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    /// Execute this action now
    Act(Action),

    /// Nothing to do yet; re-evaluate on a later tick
    Wait { delay_ms: u64 },

    /// The work belongs to another domain
    Defer { domain: String },
}

/// Declarative description of one action a chief can execute
///
/// Capabilities are used for introspection and conformance checks, never
/// for dispatch. `param_schema` is a flat map of parameter name to expected
/// JSON type name (`"string"`, `"number"`, `"bool"`, `"array"`, `"object"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Action tag this capability describes
    pub action_tag: String,

    /// Domain the action belongs to
    pub domain_tag: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Expected parameter shape, when the action takes parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_schema: Option<Value>,
}

impl Capability {
    /// Create a capability for a bare action tag
    pub fn bare(action_tag: impl Into<String>, domain_tag: impl Into<String>) -> Self {
        Self {
            action_tag: action_tag.into(),
            domain_tag: domain_tag.into(),
            description: None,
            param_schema: None,
        }
    }

    /// Attach a description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a parameter schema
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.param_schema = Some(schema);
        self
    }

    /// Whether an action structurally matches this capability
    ///
    /// The tag must match exactly. When a schema is declared, every schema
    /// key must be present in the action's parameters with the declared
    /// JSON type; extra parameters are allowed.
    pub fn matches(&self, action: &Action) -> bool {
        if self.action_tag != action.tag {
            return false;
        }

        let Some(Value::Object(schema)) = &self.param_schema else {
            return true;
        };

        let Value::Object(params) = &action.params else {
            return schema.is_empty();
        };

        schema.iter().all(|(key, expected)| {
            let Some(value) = params.get(key) else {
                return false;
            };
            match expected.as_str() {
                Some("string") => value.is_string(),
                Some("number") => value.is_number(),
                Some("bool") => value.is_boolean(),
                Some("array") => value.is_array(),
                Some("object") => value.is_object(),
                _ => true,
            }
        })
    }
}

/// One logged (state, action, reward, next-state) transition
///
/// The reward is clamped into `[REWARD_FLOOR, REWARD_CEIL]` at construction
/// and a non-finite reward collapses to 0.0, keeping downstream learning
/// numerically stable. `done` marks terminal transitions for episodic
/// training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub state: FeatureMap,
    pub action: Action,
    pub reward: f64,
    pub next_state: FeatureMap,
    pub done: bool,
    #[serde(default)]
    pub metadata: Value,
}

impl TrajectoryStep {
    pub fn new(
        state: FeatureMap,
        action: Action,
        reward: f64,
        next_state: FeatureMap,
        done: bool,
    ) -> Self {
        let reward = if reward.is_finite() {
            reward.clamp(REWARD_FLOOR, REWARD_CEIL)
        } else {
            0.0
        };
        Self {
            state,
            action,
            reward,
            next_state,
            done,
            metadata: Value::Null,
        }
    }

    /// Attach metadata to the step
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of a chief's report call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Reward for the completed turn
    pub reward: f64,

    /// Per-turn metrics, surfaced through telemetry
    pub metrics: Map<String, Value>,

    /// The trajectory step to record
    pub step: TrajectoryStep,
}

/// Terminal status of one executed plan leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Done,
    Failed,
    Skipped,
}

/// Result of performing a leaf plan node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    #[serde(default)]
    pub detail: Value,
}

impl StepResult {
    pub fn done(detail: Value) -> Self {
        Self {
            status: StepStatus::Done,
            detail,
        }
    }

    pub fn failed(detail: Value) -> Self {
        Self {
            status: StepStatus::Failed,
            detail,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            detail: Value::String(reason.into()),
        }
    }
}

/// Kind of a plan node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Expandable into children
    Composite,
    /// Directly executable
    Leaf,
}

/// Blueprint for one child node produced by an expansion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSeed {
    pub label: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub payload: Value,
    /// Explicit priority; when unset the owning chief's estimate applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
}

impl NodeSeed {
    pub fn leaf(label: impl Into<String>, payload: Value) -> Self {
        Self {
            label: label.into(),
            kind: NodeKind::Leaf,
            payload,
            priority: None,
        }
    }

    pub fn composite(label: impl Into<String>, payload: Value) -> Self {
        Self {
            label: label.into(),
            kind: NodeKind::Composite,
            payload,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Outcome of expanding a composite node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expansion {
    /// New child nodes, scheduled after insertion
    Children(Vec<NodeSeed>),

    /// No expansion; the node becomes a de-facto leaf
    Skip(String),
}

/// Lightweight view of a plan node handed to chief plan callbacks
///
/// The storage model behind it stays in the engine; chiefs only ever see
/// this flattened view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNodeRef {
    pub id: String,
    pub tree_id: String,
    pub label: String,
    pub payload: Value,
    /// Retry count so far, for steps that want backoff behavior
    pub retries: u32,
}
