use serde_json::{json, Value};

use visor_types::{CheckResult, Event, Issue, Severity};

/// Everything the sandbox exposes to an expression, built fresh per
/// evaluation from the dispatcher's view of the current scope. Holding this
/// as plain JSON keeps the bridge into the JS realm a single
/// `JSON.parse`/`JSON.stringify` round trip rather than a hand-rolled
/// `JsValue` conversion for every field.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub output: Value,
    pub outputs: Value,
    pub issues: Value,
    pub check_name: String,
    pub schema: Option<String>,
    pub group: Option<String>,
    pub branch: Option<String>,
    pub base_branch: Option<String>,
    pub files_changed: Vec<String>,
    pub event: Value,
    pub env: Value,
    pub memory: Value,
    pub attempt: u32,
}

impl EvalContext {
    pub fn new(check_name: impl Into<String>) -> Self {
        Self {
            output: Value::Null,
            outputs: json!({}),
            issues: json!([]),
            check_name: check_name.into(),
            schema: None,
            group: None,
            branch: None,
            base_branch: None,
            files_changed: Vec::new(),
            event: Value::Null,
            env: json!({}),
            memory: json!({}),
            attempt: 0,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_issues_from(mut self, result: &CheckResult) -> Self {
        self.issues = serde_json::to_value(&result.issues).unwrap_or_else(|_| json!([]));
        self
    }

    pub fn with_event(mut self, event: &Event) -> Self {
        self.branch = event.branch.clone();
        self.base_branch = event.base_branch.clone();
        self.files_changed = event.files_changed.clone();
        self.event = serde_json::to_value(event).unwrap_or(Value::Null);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_memory(mut self, memory: Value) -> Self {
        self.memory = memory;
        self
    }

    /// Derived issue counts + `hasChanges`, matching the `metadata` variable
    /// the sandbox exposes alongside `issues`.
    pub fn metadata(&self) -> Value {
        let mut counts = [0u32; 4]; // info, warning, error, critical
        if let Some(arr) = self.issues.as_array() {
            for issue in arr {
                let severity = issue
                    .get("severity")
                    .and_then(Value::as_str)
                    .unwrap_or("info");
                let idx = match severity {
                    "critical" => 3,
                    "error" => 2,
                    "warning" => 1,
                    _ => 0,
                };
                counts[idx] += 1;
            }
        }
        json!({
            "info": counts[0],
            "warning": counts[1],
            "error": counts[2],
            "critical": counts[3],
            "total": counts.iter().sum::<u32>(),
            "hasChanges": !self.files_changed.is_empty(),
        })
    }

    pub fn files_count(&self) -> usize {
        self.files_changed.len()
    }

    /// Serialize every exposed variable as a sequence of `const` declarations
    /// injected ahead of the user expression.
    pub(crate) fn var_declarations(&self) -> String {
        let mut out = String::new();
        push_const(&mut out, "output", &self.output);
        push_const(&mut out, "outputs", &self.outputs);
        push_const(&mut out, "issues", &self.issues);
        push_const(&mut out, "metadata", &self.metadata());
        push_const(&mut out, "checkName", &json!(self.check_name));
        push_const(&mut out, "schema", &json!(self.schema));
        push_const(&mut out, "group", &json!(self.group));
        push_const(&mut out, "branch", &json!(self.branch));
        push_const(&mut out, "baseBranch", &json!(self.base_branch));
        push_const(&mut out, "filesChanged", &json!(self.files_changed));
        push_const(&mut out, "filesCount", &json!(self.files_count()));
        push_const(&mut out, "event", &self.event);
        push_const(&mut out, "env", &self.env);
        push_const(&mut out, "attempt", &json!(self.attempt));
        push_const(&mut out, "__memorySnapshot", &self.memory);
        out
    }
}

fn push_const(out: &mut String, name: &str, value: &Value) {
    let json_text = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    let js_literal = serde_json::to_string(&json_text).unwrap_or_else(|_| "\"null\"".to_string());
    out.push_str(&format!("const {name} = JSON.parse({js_literal});\n"));
}

pub(crate) fn issue_from_eval_warning(rule_id: &str, message: impl Into<String>) -> Issue {
    Issue::system(rule_id, message, Severity::Warning)
}
