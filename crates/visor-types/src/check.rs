use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    External,
    Internal,
    Policy,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fanout {
    Map,
    Reduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Clone,
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaRef {
    Named(String),
    Inline(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailIfCondition {
    pub condition: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<crate::result::Severity>,
    #[serde(default)]
    pub halt_execution: bool,
}

/// `fail_if` accepts either a single predicate string or a list of named
/// conditions, each carrying its own message/severity/halt behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailIfSpec {
    Simple(String),
    Named(Vec<FailIfCondition>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffMode {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub mode: BackoffMode,
    pub delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            mode: BackoffMode::Fixed,
            delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub when: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub goto_event: Option<EventType>,
}

/// Shared shape of `on_init`/`on_success`/`on_fail`/`on_finish` blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingBlock {
    #[serde(default)]
    pub run: Vec<String>,
    #[serde(default)]
    pub run_js: Option<String>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub goto: Option<String>,
    #[serde(default)]
    pub goto_js: Option<String>,
    #[serde(default)]
    pub goto_event: Option<EventType>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

/// A declared check/step. Immutable once the plan is built; provider-specific
/// fields live in `options` and are validated by the provider at dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub check_type: String,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub on: Vec<EventType>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, rename = "if")]
    pub if_expr: Option<String>,
    #[serde(default)]
    pub fail_if: Option<FailIfSpec>,
    #[serde(default)]
    pub assume: Vec<String>,
    #[serde(default)]
    pub guarantee: Vec<String>,
    #[serde(default, rename = "forEach")]
    pub for_each: bool,
    #[serde(default)]
    pub fanout: Option<Fanout>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub criticality: Option<Criticality>,
    /// Output-group key for `ReviewSummary` aggregation (§4.11); defaults to
    /// the step's own name when absent.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub reuse_ai_session: Option<String>,
    #[serde(default)]
    pub session_mode: Option<SessionMode>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub schema: Option<SchemaRef>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub on_init: Option<RoutingBlock>,
    #[serde(default)]
    pub on_success: Option<RoutingBlock>,
    #[serde(default)]
    pub on_fail: Option<RoutingBlock>,
    #[serde(default)]
    pub on_finish: Option<RoutingBlock>,
}

impl StepConfig {
    pub fn max_runs_or_default(&self) -> u32 {
        self.max_runs.unwrap_or(50)
    }

    pub fn matches_event(&self, event_type: EventType) -> bool {
        self.on.is_empty() || self.on.contains(&event_type)
    }
}
