use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PrOpened,
    PrUpdated,
    PrClosed,
    IssueOpened,
    IssueComment,
    Manual,
    Schedule,
    WebhookReceived,
}

/// Immutable per-run trigger. `payload` carries whatever the ingress adapter
/// supplied (repository, PR/issue metadata, comment body, diffs); the fields
/// below are hoisted out because the expression sandbox and planner read
/// them directly and shouldn't have to know the payload's JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            branch: None,
            base_branch: None,
            files_changed: Vec::new(),
            payload: Value::Null,
        }
    }

    pub fn with_files_changed(mut self, files: Vec<String>) -> Self {
        self.files_changed = files;
        self
    }
}
