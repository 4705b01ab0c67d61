use serde::{Deserialize, Serialize};

use crate::event::EventType;

/// One hop of a ForEach fan-out: the step that fanned out, and which item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeSegment {
    pub step: String,
    pub item_index: usize,
}

/// Execution context key. Root scope is `(event_type)` with an empty path;
/// ForEach creates child scopes by appending a segment. Two scopes are equal
/// iff their event type and full path match, which is what gives ForEach
/// iterations, and goto_event hops, their isolation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub event_type: EventType,
    pub path: Vec<ScopeSegment>,
}

impl Scope {
    pub fn root(event_type: EventType) -> Self {
        Self {
            event_type,
            path: Vec::new(),
        }
    }

    /// Create a ForEach child scope for one array item.
    pub fn child(&self, step: impl Into<String>, item_index: usize) -> Self {
        let mut path = self.path.clone();
        path.push(ScopeSegment {
            step: step.into(),
            item_index,
        });
        Self {
            event_type: self.event_type,
            path,
        }
    }

    /// Create the isolated scope a `goto_event` transition re-enters under.
    /// The new scope shares no path prefix with `self`, so outputs written
    /// here are never visible from the originating event.
    pub fn goto_event(target_event: EventType, entry_step: impl Into<String>) -> Self {
        Self {
            event_type: target_event,
            path: vec![ScopeSegment {
                step: entry_step.into(),
                item_index: 0,
            }],
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The step name that most recently fanned this scope out, if any.
    pub fn parent_step(&self) -> Option<&str> {
        self.path.last().map(|segment| segment.step.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_scopes_for_different_items_are_distinct() {
        let root = Scope::root(EventType::Manual);
        let a = root.child("list", 0);
        let b = root.child("list", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn goto_event_scope_shares_no_path_with_origin() {
        let origin = Scope::root(EventType::IssueComment).child("trigger", 0);
        let hopped = Scope::goto_event(EventType::PrUpdated, "pr_only");
        assert_ne!(origin, hopped);
        assert_eq!(hopped.event_type, EventType::PrUpdated);
    }
}
