use visor_expr::{evaluate_predicate, EvalContext, FailPolicy};
use visor_types::rule_ids;
use visor_types::{Issue, RoutingBlock, Scope, Severity, StepConfig};

use crate::budget::{BudgetError, LoopBudget, RunCounter};
use crate::routing::{evaluate_routing_block, GotoTarget};
use crate::state::{SkipReason, StepState};

/// What the caller (the scheduler) must do next after a state-machine step.
#[derive(Debug, Clone)]
pub enum RoutingCommand {
    /// Run the provider for the current step.
    Dispatch,
    /// Run `step` in the current scope before continuing routing.
    RunRemediation { step: String },
    /// Re-enter the plan at `step`, optionally under a different event (a
    /// fresh, isolated scope for `goto_event`).
    Goto {
        step: String,
        scope: Scope,
    },
    /// Re-run the current step in place. Bounded by the shared loop budget
    /// here; the caller additionally enforces the block's own `retry.max`,
    /// since that count is per-step state this type doesn't track.
    Retry,
    /// Terminal: no further action for this (scope, step).
    Settle { state: StepState, issues: Vec<Issue> },
}

/// Drives one (scope, step) through §4.3's states. Holds no per-attempt
/// state itself — `LoopBudget`/`RunCounter` are shared across the whole run
/// and passed in by reference so accounting is consistent across steps.
pub struct RoutingStateMachine<'a> {
    pub scope: Scope,
    pub step: &'a StepConfig,
    loop_budget: &'a mut LoopBudget,
    run_counter: &'a mut RunCounter,
}

impl<'a> RoutingStateMachine<'a> {
    pub fn new(
        scope: Scope,
        step: &'a StepConfig,
        loop_budget: &'a mut LoopBudget,
        run_counter: &'a mut RunCounter,
    ) -> Self {
        Self {
            scope,
            step,
            loop_budget,
            run_counter,
        }
    }

    /// `Pending` -> evaluate `if`; falsy skips without consuming loop budget.
    pub fn enter_pending(&self, ctx: &EvalContext) -> (StepState, Option<SkipReason>) {
        match &self.step.if_expr {
            None => (StepState::Initialising, None),
            Some(expr) => {
                let outcome = evaluate_predicate(expr, ctx, FailPolicy::FailOpen);
                if outcome.value {
                    (StepState::Initialising, None)
                } else {
                    (StepState::Skipped, Some(SkipReason::IfFalse))
                }
            }
        }
    }

    /// `Initialising` -> run `on_init`. Errors here are terminal for the
    /// step and never invoke `on_fail` (§4.3, §9 OQ3).
    pub fn on_init_decision(&self, ctx: &EvalContext) -> Option<crate::routing::RoutingDecision> {
        self.step.on_init.as_ref().map(|block| evaluate_routing_block(block, ctx))
    }

    /// Records one execution against `max_runs`, erroring terminally if the
    /// cap for this (scope, step) pair is already met.
    pub fn record_attempt(&mut self) -> Result<u32, BudgetError> {
        self.run_counter
            .record_run(&self.scope, &self.step.name, self.step.max_runs_or_default())
    }

    /// `Evaluating` -> assume/guarantee/fail_if, per §4.3 step 1-4, and
    /// returns the terminal status the step would settle in absent further
    /// routing (the caller still applies `on_success`/`on_fail` on top).
    pub fn evaluate_predicates(
        &self,
        ctx: &EvalContext,
        succeeded: bool,
    ) -> (StepState, Option<SkipReason>, Vec<Issue>) {
        let mut issues = Vec::new();

        for assume in &self.step.assume {
            let outcome = evaluate_predicate(assume, ctx, FailPolicy::FailClosed);
            if let Some(warning) = outcome.warning {
                issues.push(Issue::system(rule_ids::FAIL_IF, warning, Severity::Warning));
            }
            if !outcome.value {
                return (StepState::Skipped, Some(SkipReason::Assume), issues);
            }
        }

        for guarantee in &self.step.guarantee {
            let outcome = evaluate_predicate(guarantee, ctx, FailPolicy::FailClosed);
            if let Some(warning) = outcome.warning {
                issues.push(Issue::system(rule_ids::FAIL_IF, warning, Severity::Warning));
            }
            if !outcome.value {
                issues.push(Issue::system(
                    rule_ids::CONTRACT_GUARANTEE_FAILED,
                    format!("guarantee failed: {guarantee}"),
                    Severity::Error,
                ));
            }
        }

        if let Some(fail_if) = &self.step.fail_if {
            if let Some((message, severity, halt)) = evaluate_fail_if(fail_if, ctx) {
                issues.push(Issue::system(rule_ids::FAIL_IF, message, severity));
                let _ = halt; // halt_execution is applied by the scheduler's cancellation token.
                return (StepState::Failed, None, issues);
            }
        }

        (
            if succeeded {
                StepState::Succeeded
            } else {
                StepState::Failed
            },
            None,
            issues,
        )
    }

    /// Applies an `on_success`/`on_fail` block's routing decision, consuming
    /// loop budget for any `goto`/`retry` it resolves to. Returns the
    /// command the scheduler should execute next, or `None` if the step
    /// should just settle in `terminal` as-is.
    pub fn apply_routing(
        &mut self,
        block: &RoutingBlock,
        ctx: &EvalContext,
        terminal: StepState,
        issues: Vec<Issue>,
    ) -> RoutingCommand {
        let decision = evaluate_routing_block(block, ctx);
        for warning in &decision.warnings {
            tracing::warn!(step = %self.step.name, warning, "routing predicate evaluation warning");
        }

        if let Some(first) = decision.remediation.first() {
            return RoutingCommand::RunRemediation {
                step: first.clone(),
            };
        }

        match decision.goto {
            GotoTarget::Step { step, event } => match self.loop_budget.consume(&self.scope) {
                Ok(_) => {
                    let target_scope = match event {
                        Some(event_type) => Scope::goto_event(event_type, &step),
                        None => self.scope.clone(),
                    };
                    RoutingCommand::Goto {
                        step,
                        scope: target_scope,
                    }
                }
                Err(BudgetError::LoopBudgetExceeded) => RoutingCommand::Settle {
                    state: StepState::Failed,
                    issues: with_issue(issues, rule_ids::ROUTING_LOOP_BUDGET_EXCEEDED, "loop budget exceeded"),
                },
                Err(BudgetError::MaxRunsExceeded) => unreachable!("loop_budget only returns LoopBudgetExceeded"),
            },
            GotoTarget::None if decision.retry => match self.loop_budget.consume(&self.scope) {
                Ok(_) => RoutingCommand::Retry,
                Err(_) => RoutingCommand::Settle {
                    state: StepState::Failed,
                    issues: with_issue(issues, rule_ids::ROUTING_LOOP_BUDGET_EXCEEDED, "loop budget exceeded"),
                },
            },
            GotoTarget::None => RoutingCommand::Settle {
                state: terminal,
                issues,
            },
        }
    }
}

fn with_issue(mut issues: Vec<Issue>, rule_id: &str, message: &str) -> Vec<Issue> {
    issues.push(Issue::system(rule_id, message, Severity::Error));
    issues
}

/// `fail_if` accepts a single predicate string or a list of named
/// conditions; returns the first truthy condition's `(message, severity,
/// halt_execution)`.
fn evaluate_fail_if(
    spec: &visor_types::FailIfSpec,
    ctx: &EvalContext,
) -> Option<(String, Severity, bool)> {
    match spec {
        visor_types::FailIfSpec::Simple(expr) => {
            let outcome = evaluate_predicate(expr, ctx, FailPolicy::FailClosed);
            outcome
                .value
                .then(|| ("fail_if condition met".to_string(), Severity::Error, false))
        }
        visor_types::FailIfSpec::Named(conditions) => {
            conditions.iter().find_map(|cond| {
                let outcome = evaluate_predicate(&cond.condition, ctx, FailPolicy::FailClosed);
                outcome.value.then(|| {
                    (
                        cond.message.clone().unwrap_or_else(|| cond.condition.clone()),
                        cond.severity.unwrap_or(Severity::Error),
                        cond.halt_execution,
                    )
                })
            })
        }
    }
}
