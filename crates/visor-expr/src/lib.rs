//! Sandboxed expression evaluation for Visor predicates (`if`, `fail_if`,
//! `assume`, `guarantee`, routing `transitions[].when`) and transforms
//! (`value_js`, `goto_js`, `ai_mcp_servers_js`).
//!
//! A fresh `boa_engine::Context` is created per evaluation: no global state,
//! no filesystem or network bindings exist to leak across calls because boa
//! never implements those APIs. Every exposed variable crosses the Rust/JS
//! boundary as JSON, never as a native object graph.

mod context;
mod prelude;

use boa_engine::{Context, JsError, Source};
use serde_json::Value;
use thiserror::Error;

pub use context::EvalContext;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("expression failed to compile or run: {0}")]
    Evaluation(String),
    #[error("evaluator produced a non-JSON-representable value")]
    NotRepresentable,
}

impl From<JsError> for EvalError {
    fn from(err: JsError) -> Self {
        EvalError::Evaluation(err.to_string())
    }
}

/// Which way a predicate resolves when the expression fails to evaluate.
/// `if`-gates fail open (treat the error as truthy, run anyway); `fail_if`
/// fails closed (treat the error as falsy, don't fail the step). Both cases
/// still surface the evaluation error as a warning-level issue at the call
/// site — this module only returns the `warning` text for the caller to
/// wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPolicy {
    FailOpen,
    FailClosed,
}

#[derive(Debug, Clone)]
pub struct PredicateOutcome {
    pub value: bool,
    pub warning: Option<String>,
}

/// Evaluate `expr` and return its value as JSON. The final statement's value
/// is returned whether or not it uses an explicit `return` — both forms are
/// normalized into the trailing `return` of an IIFE before evaluation.
pub fn evaluate_value(expr: &str, ctx: &EvalContext) -> Result<Value, EvalError> {
    let mut context = Context::default();
    let script = build_script(expr, ctx);
    let result = context.eval(Source::from_bytes(script.as_bytes()))?;
    if result.is_undefined() || result.is_null() {
        return Ok(Value::Null);
    }
    let json_text = result
        .to_string(&mut context)
        .map_err(|e| EvalError::Evaluation(e.to_string()))?
        .to_std_string_escaped();
    serde_json::from_str(&json_text).map_err(|_| EvalError::NotRepresentable)
}

/// Evaluate `expr` as a boolean predicate under the given fail policy.
pub fn evaluate_predicate(expr: &str, ctx: &EvalContext, policy: FailPolicy) -> PredicateOutcome {
    match evaluate_value(expr, ctx) {
        Ok(value) => PredicateOutcome {
            value: json_truthy(&value),
            warning: None,
        },
        Err(err) => PredicateOutcome {
            value: matches!(policy, FailPolicy::FailOpen),
            warning: Some(err.to_string()),
        },
    }
}

/// Evaluate a `goto_js`-style expression expected to return a step id or
/// `null`.
pub fn evaluate_goto_target(expr: &str, ctx: &EvalContext) -> Result<Option<String>, EvalError> {
    match evaluate_value(expr, ctx)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(EvalError::Evaluation(format!(
            "goto_js must return a step id string or null, got {other}"
        ))),
    }
}

fn json_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn build_script(expr: &str, ctx: &EvalContext) -> String {
    let body = wrap_as_return(expr);
    format!(
        "{prelude}\n{vars}\nJSON.stringify((function(){{\n{body}\n}})());",
        prelude = prelude::PRELUDE,
        vars = ctx.var_declarations(),
        body = body,
    )
}

/// Expressions may be multiple statements separated by `;` or newline; the
/// last statement's value is returned, and an explicit `return` there is
/// honoured. We split off the last statement and force it into a `return`
/// so both forms produce a value from the wrapping IIFE.
fn wrap_as_return(expr: &str) -> String {
    let trimmed = expr.trim_end();
    let semi = trimmed.rfind(';');
    let nl = trimmed.rfind('\n');
    let split = match (semi, nl) {
        (Some(s), Some(n)) => Some(s.max(n)),
        (Some(s), None) => Some(s),
        (None, Some(n)) => Some(n),
        (None, None) => None,
    };
    let (head, tail) = match split {
        Some(idx) => (&trimmed[..=idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    };
    let tail_trimmed = tail.trim();
    let tail_stmt = if is_return_stmt(tail_trimmed) {
        format!("{tail_trimmed};")
    } else if tail_trimmed.is_empty() {
        "return undefined;".to_string()
    } else {
        format!("return ({tail_trimmed});")
    };
    format!("{head}\n{tail_stmt}")
}

fn is_return_stmt(s: &str) -> bool {
    s == "return"
        || s.starts_with("return ")
        || s.starts_with("return(")
        || s.starts_with("return\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn simple_boolean_expression_evaluates() {
        let ctx = EvalContext::new("check").with_output(json!({"count": 3}));
        let outcome = evaluate_predicate("output.count > 2", &ctx, FailPolicy::FailOpen);
        assert!(outcome.value);
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn compile_error_fails_open_for_if_gates() {
        let ctx = EvalContext::new("check");
        let outcome = evaluate_predicate("this is not javascript", &ctx, FailPolicy::FailOpen);
        assert!(outcome.value);
        assert!(outcome.warning.is_some());
    }

    #[test]
    fn compile_error_fails_closed_for_fail_if() {
        let ctx = EvalContext::new("check");
        let outcome = evaluate_predicate("boom(", &ctx, FailPolicy::FailClosed);
        assert!(!outcome.value);
        assert!(outcome.warning.is_some());
    }

    #[test]
    fn explicit_return_in_final_statement_is_honoured() {
        let ctx = EvalContext::new("check");
        let outcome =
            evaluate_predicate("let x = 1; return x === 1;", &ctx, FailPolicy::FailOpen);
        assert!(outcome.value);
    }

    #[test]
    fn array_and_string_helper_methods_are_available() {
        let ctx = EvalContext::new("check").with_output(json!(["a", "b", "c"]));
        let outcome = evaluate_predicate(
            "output.includes('b') && 'hello'.toUpperCase() === 'HELLO'",
            &ctx,
            FailPolicy::FailOpen,
        );
        assert!(outcome.value);
    }

    #[test]
    fn goto_js_returns_step_id_or_null() {
        let ctx = EvalContext::new("check");
        assert_eq!(
            evaluate_goto_target("null", &ctx).unwrap(),
            None
        );
        assert_eq!(
            evaluate_goto_target("'retry_step'", &ctx).unwrap(),
            Some("retry_step".to_string())
        );
    }

    #[test]
    fn has_issue_and_count_issues_helpers_work_over_issue_arrays() {
        let mut ctx = EvalContext::new("check");
        ctx.issues = json!([
            {"file": "a.rs", "ruleId": "x", "severity": "error"},
            {"file": "b.rs", "ruleId": "y", "severity": "warning"},
        ]);
        let outcome = evaluate_predicate(
            "hasIssue(issues, 'ruleId', 'x') && countIssues(issues) === 2",
            &ctx,
            FailPolicy::FailOpen,
        );
        assert!(outcome.value);
    }

    #[test]
    fn evaluations_do_not_leak_state_across_calls() {
        let ctx = EvalContext::new("check");
        let _ = evaluate_value("globalThis.leaked = 42; 1;", &ctx);
        let result = evaluate_value("typeof globalThis.leaked === 'undefined'", &ctx).unwrap();
        assert_eq!(result, json!(true));
    }
}
