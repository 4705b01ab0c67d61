use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use visor_types::{Fanout, Scope};

#[derive(Debug, Error)]
pub enum ForEachError {
    #[error("forEach step `{0}` output is not an array and not a JSON-parseable array string")]
    NotAnArray(String),
}

/// Expands a `forEach: true` step's output into one child scope per item
/// (§4.9 step 1-2). Each child scope has `outputs.<step>` pre-seeded with its
/// item before any dependent runs in it.
pub fn expand(parent_scope: &Scope, step: &str, output: &Value) -> Result<Vec<(Scope, Value)>, ForEachError> {
    let items: Vec<Value> = match output {
        Value::Array(items) => items.clone(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => items,
            _ => return Err(ForEachError::NotAnArray(step.to_string())),
        },
        _ => return Err(ForEachError::NotAnArray(step.to_string())),
    };
    Ok(items
        .into_iter()
        .enumerate()
        .map(|(index, item)| (parent_scope.child(step, index), item))
        .collect())
}

/// `map` (default under a forEach ancestor) runs a dependent once per item;
/// `reduce` runs it once at the parent scope over every item's output.
pub fn dependent_fanout(declared: Option<Fanout>) -> Fanout {
    declared.unwrap_or(Fanout::Map)
}

/// Builds the `outputs.<step>` value a `reduce` dependent sees: every item's
/// output, in item order, under `.items`.
pub fn aggregate_reduce_output(item_outputs: Vec<Value>) -> Value {
    serde_json::json!({ "items": item_outputs })
}

/// Tracks how many child scopes (and their dependents) a forEach parent has
/// fanned out, so `on_finish` can fire exactly once, after the last one
/// settles (§4.9 step 5).
#[derive(Default)]
pub struct ForEachTracker {
    expected: HashMap<(Scope, String), usize>,
    settled: HashMap<(Scope, String), usize>,
}

impl ForEachTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, parent_scope: &Scope, step: &str, item_count: usize) {
        self.expected
            .insert((parent_scope.clone(), step.to_string()), item_count);
        self.settled
            .insert((parent_scope.clone(), step.to_string()), 0);
    }

    /// Call once a child scope and every dependent scheduled within it has
    /// reached a terminal state. Returns `true` exactly once, on the call
    /// that completes the last outstanding child.
    pub fn mark_item_settled(&mut self, parent_scope: &Scope, step: &str) -> bool {
        let key = (parent_scope.clone(), step.to_string());
        let Some(expected) = self.expected.get(&key).copied() else {
            return false;
        };
        let settled = self.settled.entry(key).or_insert(0);
        *settled += 1;
        *settled == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use visor_types::EventType;

    #[test]
    fn expand_creates_one_child_scope_per_item() {
        let parent = Scope::root(EventType::PrUpdated);
        let children = expand(&parent, "list_files", &json!(["a.rs", "b.rs"])).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].1, json!("a.rs"));
        assert_ne!(children[0].0, children[1].0);
    }

    #[test]
    fn expand_parses_json_array_string() {
        let parent = Scope::root(EventType::PrUpdated);
        let children = expand(&parent, "list_files", &json!("[1, 2, 3]")).unwrap();
        assert_eq!(children.len(), 3);
    }

    #[test]
    fn expand_rejects_non_array_output() {
        let parent = Scope::root(EventType::PrUpdated);
        let err = expand(&parent, "list_files", &json!({"not": "an array"})).unwrap_err();
        assert!(matches!(err, ForEachError::NotAnArray(step) if step == "list_files"));
    }

    #[test]
    fn on_finish_fires_only_after_every_child_settles() {
        let parent = Scope::root(EventType::PrUpdated);
        let mut tracker = ForEachTracker::new();
        tracker.register(&parent, "list_files", 3);
        assert!(!tracker.mark_item_settled(&parent, "list_files"));
        assert!(!tracker.mark_item_settled(&parent, "list_files"));
        assert!(tracker.mark_item_settled(&parent, "list_files"));
    }
}
