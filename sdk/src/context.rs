//! Domain context container
//!
//! The `DomainContext` is the caller-supplied state container handed to
//! every contract call for a given chief. The engine treats it as opaque
//! beyond the few scratch fields it maintains itself (deferral notes and
//! the last wait). Each chief exclusively owns and mutates its context
//! during its turn; the conductor never touches the value map directly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A recorded wait from a previous turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitState {
    /// Tick the wait was requested at
    pub tick: u64,

    /// Requested delay in milliseconds
    pub delay_ms: u64,
}

/// Per-chief domain state container
///
/// JSON-map-backed with typed accessors. Every mutation bumps a revision
/// counter; observations snapshot that revision so consumers can detect
/// staleness without holding references into the map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainContext {
    values: Map<String, Value>,

    /// Revision counter, bumped on every mutation
    rev: u64,

    /// Domains that deferred work to this chief since its last turn
    #[serde(default)]
    deferrals: Vec<String>,

    /// The most recent wait decision, if any
    #[serde(default)]
    last_wait: Option<WaitState>,
}

impl DomainContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision of the context
    pub fn rev(&self) -> u64 {
        self.rev
    }

    /// Get a raw value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a count value, defaulting to 0
    pub fn count(&self, key: &str) -> u64 {
        self.values.get(key).and_then(Value::as_u64).unwrap_or(0)
    }

    /// Get a ratio value, defaulting to `default`
    pub fn ratio_or(&self, key: &str, default: f64) -> f64 {
        self.values.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    /// Get a boolean value, defaulting to false
    pub fn flag(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Get a text value
    pub fn text(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Set a value, bumping the revision
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
        self.rev += 1;
    }

    /// Remove a value, bumping the revision if it existed
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.rev += 1;
        }
        removed
    }

    /// Record that another domain deferred work to this chief
    pub fn note_deferral(&mut self, from_domain: impl Into<String>) {
        self.deferrals.push(from_domain.into());
        self.rev += 1;
    }

    /// Deferral notes accumulated since the last drain
    pub fn deferrals(&self) -> &[String] {
        &self.deferrals
    }

    /// Drain accumulated deferral notes
    pub fn take_deferrals(&mut self) -> Vec<String> {
        if self.deferrals.is_empty() {
            return Vec::new();
        }
        self.rev += 1;
        std::mem::take(&mut self.deferrals)
    }

    /// Record a wait decision
    pub fn set_wait(&mut self, tick: u64, delay_ms: u64) {
        self.last_wait = Some(WaitState { tick, delay_ms });
        self.rev += 1;
    }

    /// The most recent wait, if any
    pub fn last_wait(&self) -> Option<WaitState> {
        self.last_wait
    }

    /// Serializable snapshot of the full context
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors_and_defaults() {
        let mut ctx = DomainContext::new();
        ctx.set("pending_count", 5u64);
        ctx.set("energy_level", 0.75);
        ctx.set("gate_open", true);
        ctx.set("mode", "steady");

        assert_eq!(ctx.count("pending_count"), 5);
        assert_eq!(ctx.count("missing"), 0);
        assert!((ctx.ratio_or("energy_level", 0.0) - 0.75).abs() < f64::EPSILON);
        assert!((ctx.ratio_or("missing", 1.0) - 1.0).abs() < f64::EPSILON);
        assert!(ctx.flag("gate_open"));
        assert_eq!(ctx.text("mode"), Some("steady"));
    }

    #[test]
    fn test_rev_bumps_on_mutation_only() {
        let mut ctx = DomainContext::new();
        assert_eq!(ctx.rev(), 0);

        ctx.set("x", 1u64);
        assert_eq!(ctx.rev(), 1);

        // Reads do not bump
        let _ = ctx.count("x");
        let _ = ctx.get("x");
        assert_eq!(ctx.rev(), 1);

        ctx.remove("x");
        assert_eq!(ctx.rev(), 2);

        // Removing a missing key does not bump
        ctx.remove("x");
        assert_eq!(ctx.rev(), 2);
    }

    #[test]
    fn test_deferral_notes() {
        let mut ctx = DomainContext::new();
        ctx.note_deferral("balance");
        ctx.note_deferral("lineage");
        assert_eq!(ctx.deferrals(), &["balance", "lineage"]);

        let drained = ctx.take_deferrals();
        assert_eq!(drained, vec!["balance", "lineage"]);
        assert!(ctx.deferrals().is_empty());

        // Draining an empty list does not bump the revision
        let rev = ctx.rev();
        assert!(ctx.take_deferrals().is_empty());
        assert_eq!(ctx.rev(), rev);
    }

    #[test]
    fn test_wait_state() {
        let mut ctx = DomainContext::new();
        assert!(ctx.last_wait().is_none());

        ctx.set_wait(7, 500);
        assert_eq!(
            ctx.last_wait(),
            Some(WaitState {
                tick: 7,
                delay_ms: 500
            })
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut ctx = DomainContext::new();
        ctx.set("pending_count", 3u64);
        ctx.note_deferral("intake");

        let snapshot = ctx.snapshot();
        assert_eq!(snapshot["values"]["pending_count"], json!(3));

        let restored: DomainContext = serde_json::from_value(snapshot).unwrap();
        assert_eq!(restored.count("pending_count"), 3);
        assert_eq!(restored.deferrals(), &["intake"]);
        assert_eq!(restored.rev(), ctx.rev());
    }
}
