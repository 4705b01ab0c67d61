use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Failure,
    Skipped,
}

/// A structured finding attached to a check's result. System-authored issues
/// (failed `fail_if`/`assume`/`guarantee`, routing budget exhaustion) use
/// `file: "system"`, `line: 0` and are filtered out of human-facing
/// formatters but never dropped from JSON/SARIF output or from tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub file: String,
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    pub rule_id: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl Issue {
    pub fn system(rule_id: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            file: "system".to_string(),
            line: 0,
            end_line: None,
            rule_id: rule_id.into(),
            message: message.into(),
            severity,
            category: None,
            suggestion: None,
            replacement: None,
            group: None,
            schema: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.file == "system" && self.line == 0
    }
}

/// Produced by a provider for one execution of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl CheckResult {
    pub fn success(output: Value) -> Self {
        Self {
            status: CheckStatus::Success,
            output,
            issues: Vec::new(),
            session_id: None,
            debug: None,
            skip_reason: None,
        }
    }

    pub fn failure(issues: Vec<Issue>) -> Self {
        Self {
            status: CheckStatus::Failure,
            output: Value::Null,
            issues,
            session_id: None,
            debug: None,
            skip_reason: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Skipped,
            output: Value::Null,
            issues: Vec::new(),
            session_id: None,
            debug: None,
            skip_reason: Some(reason.into()),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}
