use serde_json::Value;
use visor_expr::{evaluate_goto_target, evaluate_predicate, evaluate_value, EvalContext, FailPolicy};
use visor_types::{EventType, RoutingBlock};

/// Resolved goto target for a routing decision. `None` means no transition
/// fired and no `goto_js`/`goto` fallback produced a target either — the
/// step settles in its current terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GotoTarget {
    Step {
        step: String,
        event: Option<EventType>,
    },
    None,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingDecision {
    /// `run`/`run_js` remediation steps, executed in order, in the current
    /// scope, before goto/retry.
    pub remediation: Vec<String>,
    pub goto: GotoTarget,
    pub retry: bool,
    pub warnings: Vec<String>,
}

impl Default for GotoTarget {
    fn default() -> Self {
        GotoTarget::None
    }
}

/// Pure evaluation of one `on_init`/`on_success`/`on_fail`/`on_finish` block
/// against the current expression context. Does not touch loop/run budgets
/// or mutate any state — the caller (the state machine) is responsible for
/// accounting and for actually executing the remediation/goto it returns.
pub fn evaluate_routing_block(block: &RoutingBlock, ctx: &EvalContext) -> RoutingDecision {
    let mut warnings = Vec::new();

    let remediation = match &block.run_js {
        Some(expr) => match evaluate_value(expr, ctx) {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Ok(other) => {
                warnings.push(format!("run_js must return an array of step ids, got {other}"));
                Vec::new()
            }
            Err(err) => {
                warnings.push(err.to_string());
                Vec::new()
            }
        },
        None => block.run.clone(),
    };

    // `transitions[]` first truthy `when` wins. Compile errors in a
    // transition predicate are treated as non-matches (fail closed) rather
    // than aborting the whole block, so a broken rule doesn't block
    // evaluation of the rules after it.
    let mut matched: Option<(Option<String>, Option<EventType>)> = None;
    for transition in &block.transitions {
        let outcome = evaluate_predicate(&transition.when, ctx, FailPolicy::FailClosed);
        if let Some(warning) = outcome.warning {
            warnings.push(warning);
        }
        if outcome.value {
            matched = Some((transition.to.clone(), transition.goto_event));
            break;
        }
    }

    let goto = if let Some((to, goto_event)) = matched {
        match to {
            // An explicit `to: null` match disables any `goto_js`/`goto`
            // fallback for this evaluation, even if one is configured.
            None => GotoTarget::None,
            Some(step) => GotoTarget::Step {
                step,
                event: goto_event,
            },
        }
    } else if let Some(expr) = &block.goto_js {
        match evaluate_goto_target(expr, ctx) {
            Ok(Some(step)) => GotoTarget::Step {
                step,
                event: block.goto_event,
            },
            Ok(None) => GotoTarget::None,
            Err(err) => {
                warnings.push(err.to_string());
                GotoTarget::None
            }
        }
    } else if let Some(step) = &block.goto {
        GotoTarget::Step {
            step: step.clone(),
            event: block.goto_event,
        }
    } else {
        GotoTarget::None
    };

    RoutingDecision {
        remediation,
        goto,
        retry: block.retry.is_some(),
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use visor_types::Transition;

    #[test]
    fn first_matching_transition_wins() {
        let block = RoutingBlock {
            transitions: vec![
                Transition {
                    when: "false".to_string(),
                    to: Some("never".to_string()),
                    goto_event: None,
                },
                Transition {
                    when: "true".to_string(),
                    to: Some("target".to_string()),
                    goto_event: None,
                },
                Transition {
                    when: "true".to_string(),
                    to: Some("unreached".to_string()),
                    goto_event: None,
                },
            ],
            ..Default::default()
        };
        let ctx = EvalContext::new("check");
        let decision = evaluate_routing_block(&block, &ctx);
        assert_eq!(
            decision.goto,
            GotoTarget::Step {
                step: "target".to_string(),
                event: None
            }
        );
    }

    #[test]
    fn explicit_to_null_disables_fallback_goto() {
        let block = RoutingBlock {
            transitions: vec![Transition {
                when: "true".to_string(),
                to: None,
                goto_event: None,
            }],
            goto: Some("fallback".to_string()),
            ..Default::default()
        };
        let ctx = EvalContext::new("check");
        let decision = evaluate_routing_block(&block, &ctx);
        assert_eq!(decision.goto, GotoTarget::None);
    }

    #[test]
    fn falls_back_to_goto_js_then_static_goto() {
        let ctx = EvalContext::new("check");

        let js_block = RoutingBlock {
            goto_js: Some("'from_js'".to_string()),
            goto: Some("static_target".to_string()),
            ..Default::default()
        };
        let decision = evaluate_routing_block(&js_block, &ctx);
        assert_eq!(
            decision.goto,
            GotoTarget::Step {
                step: "from_js".to_string(),
                event: None
            }
        );

        let static_block = RoutingBlock {
            goto: Some("static_target".to_string()),
            ..Default::default()
        };
        let decision = evaluate_routing_block(&static_block, &ctx);
        assert_eq!(
            decision.goto,
            GotoTarget::Step {
                step: "static_target".to_string(),
                event: None
            }
        );
    }

    #[test]
    fn run_js_resolves_to_remediation_step_list() {
        let block = RoutingBlock {
            run_js: Some("['fix_lint', 'fix_format']".to_string()),
            ..Default::default()
        };
        let ctx = EvalContext::new("check");
        let decision = evaluate_routing_block(&block, &ctx);
        assert_eq!(decision.remediation, vec!["fix_lint", "fix_format"]);
    }

    #[test]
    fn broken_transition_predicate_is_skipped_not_fatal() {
        let block = RoutingBlock {
            transitions: vec![
                Transition {
                    when: "not valid js (".to_string(),
                    to: Some("broken".to_string()),
                    goto_event: None,
                },
                Transition {
                    when: "true".to_string(),
                    to: Some("recovered".to_string()),
                    goto_event: None,
                },
            ],
            ..Default::default()
        };
        let ctx = EvalContext::new("check").with_output(json!(null));
        let decision = evaluate_routing_block(&block, &ctx);
        assert_eq!(
            decision.goto,
            GotoTarget::Step {
                step: "recovered".to_string(),
                event: None
            }
        );
        assert!(!decision.warnings.is_empty());
    }
}
