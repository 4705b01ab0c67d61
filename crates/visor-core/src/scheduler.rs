//! Scheduler (§4.2): drives each planned step through the routing state
//! machine to a terminal outcome. Grounded on the teacher's
//! `OrchestratorEngine` (`src-tauri/src/orchestrator/engine.rs`) — a
//! `tokio::sync::Semaphore`-bounded worker pool with a `CancellationToken`
//! for `fail_fast` — but structured as recursive memoized resolution rather
//! than a driven ready-queue: resolving a step first resolves its
//! `depends_on` concurrently (`futures::future::join_all`, already a
//! `tandem-core` dependency), so independent branches of the DAG run in
//! parallel without a separate scheduling loop, and a `tokio::sync::OnceCell`
//! per `(scope, step)` gives at-most-one-execution (§3 invariant 2) even
//! when several dependents await the same dependency at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use visor_expr::EvalContext;
use visor_memory::MemoryHandle;
use visor_providers::{DispatchContext, Dispatcher};
use visor_routing::{
    evaluate_routing_block, BudgetError, ForEachTracker, LoopBudget, RoutingCommand,
    RoutingStateMachine, RunCounter, StepState,
};
use visor_session::SessionRegistry;
use visor_types::{
    rule_ids, BackoffMode, CheckStatus, Event, Issue, RetryConfig, RoutingBlock, Scope, SessionMode, Severity,
    StepConfig,
};
use visor_workspace::WorkspaceHandle;

use crate::aggregation::{aggregate, ReviewSummary, RunStats, StepOutcome};
use crate::planner::Plan;

/// Run-wide knobs derived from the effective config (§6).
pub struct EngineOptions {
    pub max_parallelism: usize,
    pub max_loops: u32,
    pub fail_fast: bool,
}

/// Drives one run of a `Plan` to completion. Holds all cross-step shared
/// state (outputs, loop/run budgets, in-flight memoization) behind locks so
/// steps can run concurrently up to `max_parallelism`.
pub struct Engine {
    steps: HashMap<String, StepConfig>,
    dispatcher: Dispatcher,
    memory: MemoryHandle,
    sessions: Arc<SessionRegistry>,
    workspace: WorkspaceHandle,
    semaphore: Arc<Semaphore>,
    cancellation: CancellationToken,
    fail_fast: bool,
    loop_budget: Mutex<LoopBudget>,
    run_counter: Mutex<RunCounter>,
    outputs: Mutex<HashMap<Scope, HashMap<String, Value>>>,
    outputs_history: Mutex<HashMap<(Scope, String), Vec<Value>>>,
    cells: Mutex<HashMap<(Scope, String), Arc<OnceCell<StepOutcome>>>>,
    all_outcomes: Mutex<Vec<StepOutcome>>,
    routing_hops: AtomicU32,
    foreach_tracker: Mutex<ForEachTracker>,
    event: Event,
}

impl Engine {
    pub fn new(
        plan: &Plan,
        event: Event,
        dispatcher: Dispatcher,
        memory: MemoryHandle,
        sessions: Arc<SessionRegistry>,
        workspace: WorkspaceHandle,
        options: EngineOptions,
    ) -> Self {
        // `all_steps` is the tag/trigger-admitted superset (includes steps
        // gated on other events, reachable only via `goto_event`); layering
        // the root-admitted `plan.steps` on top keeps them authoritative and
        // lets hand-built `Plan`s that only set `steps` (as the tests below
        // do) keep working without populating `all_steps`.
        let mut steps = plan.all_steps.clone();
        for planned in &plan.steps {
            steps.insert(planned.config.name.clone(), planned.config.clone());
        }
        Self {
            steps,
            dispatcher,
            memory,
            sessions,
            workspace,
            semaphore: Arc::new(Semaphore::new(options.max_parallelism.max(1))),
            cancellation: CancellationToken::new(),
            fail_fast: options.fail_fast,
            loop_budget: Mutex::new(LoopBudget::new(options.max_loops)),
            run_counter: Mutex::new(RunCounter::new()),
            outputs: Mutex::new(HashMap::new()),
            outputs_history: Mutex::new(HashMap::new()),
            cells: Mutex::new(HashMap::new()),
            all_outcomes: Mutex::new(Vec::new()),
            routing_hops: AtomicU32::new(0),
            foreach_tracker: Mutex::new(ForEachTracker::new()),
            event,
        }
    }

    /// The token a caller can cancel from outside (e.g. on SIGINT) to stop
    /// further dispatch; already wired to `fail_fast` internally.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Resolves every top-level planned step to a terminal outcome and
    /// aggregates the run (§4.11). Steps not reachable from the top level
    /// (forEach children, remediation, goto targets) are folded in via
    /// whichever step first resolves them.
    pub async fn run(&self, plan: &Plan) -> (HashMap<String, ReviewSummary>, RunStats) {
        let start = Instant::now();
        let root = Scope::root(self.event.event_type);
        let names: Vec<String> = plan.steps.iter().map(|s| s.config.name.clone()).collect();
        futures::future::join_all(names.into_iter().map(|name| self.resolve(name, root.clone()))).await;

        let duration = start.elapsed();
        let routing_hops = self.routing_hops.load(Ordering::Relaxed);
        let outcomes = self.all_outcomes.lock().await.clone();
        aggregate(&outcomes, routing_hops, duration)
    }

    fn resolve(
        &self,
        name: String,
        scope: Scope,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = StepOutcome> + Send + '_>> {
        Box::pin(async move {
            let cell = {
                let mut cells = self.cells.lock().await;
                cells
                    .entry((scope.clone(), name.clone()))
                    .or_insert_with(|| Arc::new(OnceCell::new()))
                    .clone()
            };
            cell.get_or_init(|| async {
                let outcome = self.execute(&name, scope.clone()).await;
                self.all_outcomes.lock().await.push(outcome.clone());
                outcome
            })
            .await
            .clone()
        })
    }

    async fn execute(&self, name: &str, scope: Scope) -> StepOutcome {
        let Some(step) = self.steps.get(name).cloned() else {
            return StepOutcome {
                step: name.to_string(),
                group: None,
                status: CheckStatus::Skipped,
                output: Value::Null,
                issues: vec![Issue::system(
                    rule_ids::PLAN_UNRESOLVED_DEPENDENCY,
                    format!("step `{name}` is not declared"),
                    Severity::Error,
                )],
                debug: None,
            };
        };

        if !step.depends_on.is_empty() {
            let dep_outcomes = futures::future::join_all(
                step.depends_on.iter().map(|dep| self.resolve(dep.clone(), scope.clone())),
            )
            .await;
            let deps_ok = dep_outcomes
                .iter()
                .all(|o| o.status == CheckStatus::Success || step.continue_on_failure);
            if !deps_ok {
                return self.settle(&step, CheckStatus::Skipped, Vec::new(), Value::Null);
            }
        }

        if self.cancellation.is_cancelled() {
            return self.settle(&step, CheckStatus::Skipped, Vec::new(), Value::Null);
        }

        let mut attempt: u32 = 0;
        loop {
            let outputs_snapshot = self.outputs_snapshot(&scope).await;
            let pending_ctx = EvalContext::new(step.name.clone())
                .with_outputs(outputs_snapshot.clone())
                .with_event(&self.event)
                .with_attempt(attempt);

            {
                let mut loop_budget = self.loop_budget.lock().await;
                let mut run_counter = self.run_counter.lock().await;
                let mut machine = RoutingStateMachine::new(scope.clone(), &step, &mut loop_budget, &mut run_counter);
                let (state, _reason) = machine.enter_pending(&pending_ctx);
                if state == StepState::Skipped {
                    return self.settle(&step, CheckStatus::Skipped, Vec::new(), Value::Null);
                }
                match machine.record_attempt() {
                    Ok(_) => {}
                    Err(BudgetError::MaxRunsExceeded) => {
                        let issues = vec![Issue::system(
                            rule_ids::ROUTING_MAX_RUNS_EXCEEDED,
                            format!("step `{}` exceeded max_runs", step.name),
                            Severity::Error,
                        )];
                        return self.settle(&step, CheckStatus::Failure, issues, Value::Null);
                    }
                    Err(BudgetError::LoopBudgetExceeded) => {
                        unreachable!("record_attempt only reports MaxRunsExceeded")
                    }
                }
            }

            if let Some(init_block) = &step.on_init {
                let decision = evaluate_routing_block(init_block, &pending_ctx);
                for warning in &decision.warnings {
                    tracing::warn!(step = %step.name, warning, "on_init predicate evaluation warning");
                }
                let mut init_failed = false;
                for rem in &decision.remediation {
                    let outcome = self.resolve(rem.clone(), scope.clone()).await;
                    if outcome.status == CheckStatus::Failure {
                        init_failed = true;
                    }
                }
                if init_failed {
                    // on_init errors are terminal; on_fail never runs (§4.3, §9 OQ3).
                    let issues = vec![Issue::system(
                        "routing/on_init_failed",
                        format!("on_init remediation failed for `{}`", step.name),
                        Severity::Error,
                    )];
                    return self.settle(&step, CheckStatus::Failure, issues, Value::Null);
                }
            }

            if self.cancellation.is_cancelled() {
                return self.settle(&step, CheckStatus::Skipped, Vec::new(), Value::Null);
            }

            let session_id = match &step.reuse_ai_session {
                Some(parent_id) => {
                    let mode = step.session_mode.unwrap_or(SessionMode::Append);
                    match self.sessions.reuse(parent_id, mode, || Uuid::new_v4().to_string()).await {
                        Ok((id, _handle)) => Some(id),
                        Err(_) => {
                            let issues = vec![Issue::system(
                                rule_ids::SESSION_UNRESOLVED,
                                format!("reuse_ai_session `{parent_id}` is not registered"),
                                Severity::Error,
                            )];
                            return self.settle(&step, CheckStatus::Failure, issues, Value::Null);
                        }
                    }
                }
                None => None,
            };
            let session_history = match &session_id {
                Some(id) => self.sessions.history(id).await.unwrap_or_default(),
                None => Vec::new(),
            };

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("engine semaphore is never closed");
            let dispatch_ctx = DispatchContext {
                event: self.event.clone(),
                scope: scope.clone(),
                check_name: step.name.clone(),
                outputs: outputs_snapshot.clone(),
                memory: self.memory.clone(),
                sessions: self.sessions.clone(),
                session_id,
                session_history,
                working_directory: self.workspace.working_directory.clone(),
                env: env_snapshot(),
                cancellation: self.cancellation.clone(),
                attempt,
            };
            let result = self.dispatcher.dispatch(&step, &dispatch_ctx).await;
            drop(permit);

            let eval_ctx = EvalContext::new(step.name.clone())
                .with_output(result.output.clone())
                .with_outputs(outputs_snapshot.clone())
                .with_issues_from(&result)
                .with_event(&self.event)
                .with_attempt(attempt);
            let succeeded = result.status == CheckStatus::Success;

            let (final_state, _skip_reason, mut issues) = {
                let mut loop_budget = self.loop_budget.lock().await;
                let mut run_counter = self.run_counter.lock().await;
                let machine = RoutingStateMachine::new(scope.clone(), &step, &mut loop_budget, &mut run_counter);
                machine.evaluate_predicates(&eval_ctx, succeeded)
            };
            issues.extend(result.issues.clone());

            if final_state == StepState::Skipped {
                return self.settle(&step, CheckStatus::Skipped, issues, Value::Null);
            }

            let block = if final_state == StepState::Succeeded {
                step.on_success.clone()
            } else {
                step.on_fail.clone()
            };

            let retry_cfg = block.as_ref().and_then(|b| b.retry.clone());
            let command = match block {
                Some(block) => {
                    let decision = evaluate_routing_block(&block, &eval_ctx);
                    for warning in &decision.warnings {
                        tracing::warn!(step = %step.name, warning, "routing predicate evaluation warning");
                    }
                    for rem in &decision.remediation {
                        self.resolve(rem.clone(), scope.clone()).await;
                    }
                    // Remediation already ran above; pass a copy with no
                    // `run`/`run_js` so `apply_routing` only accounts for
                    // goto/retry/settle and doesn't re-report the same list.
                    let remediation_free = RoutingBlock {
                        run: Vec::new(),
                        run_js: None,
                        ..block
                    };
                    let mut loop_budget = self.loop_budget.lock().await;
                    let mut run_counter = self.run_counter.lock().await;
                    let mut machine = RoutingStateMachine::new(scope.clone(), &step, &mut loop_budget, &mut run_counter);
                    machine.apply_routing(&remediation_free, &eval_ctx, final_state, issues.clone())
                }
                None => RoutingCommand::Settle {
                    state: final_state,
                    issues: issues.clone(),
                },
            };

            match command {
                RoutingCommand::Settle { state, issues } => {
                    if state == StepState::Succeeded {
                        self.record_output(&scope, &step.name, result.output.clone()).await;
                    }
                    if state == StepState::Failed && self.fail_fast {
                        self.cancellation.cancel();
                    }
                    let status = to_check_status(state);
                    let outcome = self.settle(&step, status, issues, result.output.clone());
                    if step.for_each && state == StepState::Succeeded {
                        self.expand_foreach(&step, &scope, &result.output).await;
                    }
                    return outcome;
                }
                RoutingCommand::Goto {
                    step: target,
                    scope: target_scope,
                } => {
                    self.routing_hops.fetch_add(1, Ordering::Relaxed);
                    if target == step.name && target_scope == scope {
                        // Self-goto: resolving `name` here would deadlock on
                        // our own in-flight OnceCell, so treat it as a retry.
                        sleep_for_backoff(retry_cfg.as_ref(), attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return self.resolve(target, target_scope).await;
                }
                RoutingCommand::Retry => {
                    // The shared loop budget already bounded this transition
                    // (`apply_routing` consumed it); also honour the step's
                    // own `retry.max`, which is a tighter, per-step cap the
                    // shared budget knows nothing about.
                    if let Some(max) = retry_cfg.as_ref().map(|r| r.max) {
                        if attempt >= max {
                            let mut issues = issues;
                            issues.push(Issue::system(
                                rule_ids::ROUTING_RETRY_EXHAUSTED,
                                format!("step `{}` exhausted its retry.max of {max}", step.name),
                                Severity::Error,
                            ));
                            return self.settle(&step, CheckStatus::Failure, issues, result.output.clone());
                        }
                    }
                    sleep_for_backoff(retry_cfg.as_ref(), attempt).await;
                    attempt += 1;
                    continue;
                }
                RoutingCommand::RunRemediation { .. } => {
                    unreachable!("remediation was already executed before apply_routing")
                }
                RoutingCommand::Dispatch => unreachable!("apply_routing never returns Dispatch"),
            }
        }
    }

    /// Expands a settled `forEach` step's output into per-item child scopes
    /// (§4.9), runs each `map` dependent once per item, runs each `reduce`
    /// dependent once at the parent scope over the aggregated items, and
    /// fires `on_finish` once every item has settled.
    async fn expand_foreach(&self, step: &StepConfig, parent_scope: &Scope, output: &Value) {
        let children = match visor_routing::expand(parent_scope, &step.name, output) {
            Ok(children) => children,
            Err(err) => {
                tracing::warn!(step = %step.name, error = %err, "forEach expansion failed");
                return;
            }
        };

        let dependents: Vec<StepConfig> = self
            .steps
            .values()
            .filter(|candidate| candidate.depends_on.contains(&step.name))
            .cloned()
            .collect();
        let map_deps: Vec<&StepConfig> = dependents
            .iter()
            .filter(|d| matches!(visor_routing::dependent_fanout(d.fanout), visor_types::Fanout::Map))
            .collect();
        let reduce_deps: Vec<&StepConfig> = dependents
            .iter()
            .filter(|d| matches!(visor_routing::dependent_fanout(d.fanout), visor_types::Fanout::Reduce))
            .collect();

        self.foreach_tracker.lock().await.register(parent_scope, &step.name, children.len());

        // Every item is awaited in sequence, so this is always `true` by the
        // time the loop ends; we still ask the tracker rather than assume
        // it, so `on_finish` only fires on the call that actually completes
        // the last outstanding child (empty forEach output settles with no
        // iterations at all, which also counts as fully settled).
        let mut all_settled = children.is_empty();
        let mut items = Vec::with_capacity(children.len());
        for (child_scope, item) in &children {
            self.record_output(child_scope, &step.name, item.clone()).await;
            for dep in &map_deps {
                self.resolve(dep.name.clone(), child_scope.clone()).await;
            }
            items.push(item.clone());
            all_settled = self.foreach_tracker.lock().await.mark_item_settled(parent_scope, &step.name);
        }

        if !reduce_deps.is_empty() {
            let aggregate = visor_routing::aggregate_reduce_output(items);
            self.record_output(parent_scope, &step.name, aggregate).await;
            for dep in &reduce_deps {
                self.resolve(dep.name.clone(), parent_scope.clone()).await;
            }
        }

        if all_settled {
            if let Some(finish_block) = &step.on_finish {
                let ctx = EvalContext::new(step.name.clone());
                let decision = evaluate_routing_block(finish_block, &ctx);
                for rem in &decision.remediation {
                    self.resolve(rem.clone(), parent_scope.clone()).await;
                }
            }
        }
    }

    async fn outputs_snapshot(&self, scope: &Scope) -> Value {
        let outputs = self.outputs.lock().await;
        match outputs.get(scope) {
            Some(map) => serde_json::to_value(map).unwrap_or_else(|_| Value::Object(Default::default())),
            None => Value::Object(Default::default()),
        }
    }

    async fn record_output(&self, scope: &Scope, name: &str, value: Value) {
        {
            let mut outputs = self.outputs.lock().await;
            outputs.entry(scope.clone()).or_default().insert(name.to_string(), value.clone());
        }
        let mut history = self.outputs_history.lock().await;
        history.entry((scope.clone(), name.to_string())).or_default().push(value);
    }

    fn settle(&self, step: &StepConfig, status: CheckStatus, issues: Vec<Issue>, output: Value) -> StepOutcome {
        StepOutcome {
            step: step.name.clone(),
            group: step.group.clone(),
            status,
            output,
            issues,
            debug: None,
        }
    }
}

fn to_check_status(state: StepState) -> CheckStatus {
    match state {
        StepState::Succeeded => CheckStatus::Success,
        StepState::Failed => CheckStatus::Failure,
        StepState::Skipped | StepState::Cancelled => CheckStatus::Skipped,
        other => unreachable!("apply_routing never settles into {other:?}"),
    }
}

fn env_snapshot() -> Value {
    serde_json::to_value(std::env::vars().collect::<HashMap<String, String>>()).unwrap_or(Value::Null)
}

/// Waits out a step's configured retry backoff before the next attempt
/// (§4.3 routing retry). `attempt` is the 0-based count of attempts already
/// made, so the first retry sleeps for one backoff unit. Exponential backoff
/// doubles per attempt and is capped at 60s, mirroring the restart backoff
/// the teacher's channel dispatcher uses.
async fn sleep_for_backoff(retry: Option<&RetryConfig>, attempt: u32) {
    let Some(retry) = retry else { return };
    if retry.backoff.delay_ms == 0 {
        return;
    }
    let delay_ms = match retry.backoff.mode {
        BackoffMode::Fixed => retry.backoff.delay_ms,
        BackoffMode::Exponential => retry
            .backoff
            .delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(60_000),
    };
    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use visor_memory::{Backend, MemoryStore};
    use visor_providers::ProviderRegistry;
    use visor_types::EventType;
    use visor_workspace::WorkspaceManager;

    fn step(name: &str, check_type: &str, depends_on: &[&str]) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            check_type: check_type.to_string(),
            options: json!({}),
            on: Vec::new(),
            triggers: Vec::new(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            if_expr: None,
            fail_if: None,
            assume: Vec::new(),
            guarantee: Vec::new(),
            for_each: false,
            fanout: None,
            tags: Vec::new(),
            criticality: None,
            group: None,
            continue_on_failure: false,
            max_runs: None,
            reuse_ai_session: None,
            session_mode: None,
            timeout: None,
            schema: None,
            template: None,
            on_init: None,
            on_success: None,
            on_fail: None,
            on_finish: None,
        }
    }

    async fn engine_for(plan: Plan, options: EngineOptions) -> Engine {
        let memory = MemoryStore::new(Backend::InMemory).await.unwrap();
        let workspace_dir = tempfile::tempdir().unwrap();
        let workspace = WorkspaceManager::with_base_dir(workspace_dir.path())
            .prepare("scheduler-test", None, false)
            .await;
        Engine::new(
            &plan,
            Event::new(EventType::Manual),
            Dispatcher::new(Arc::new(ProviderRegistry::with_builtins())),
            memory,
            Arc::new(SessionRegistry::new()),
            workspace,
            options,
        )
    }

    fn default_options() -> EngineOptions {
        EngineOptions {
            max_parallelism: 2,
            max_loops: 25,
            fail_fast: false,
        }
    }

    #[tokio::test]
    async fn a_dependent_step_only_runs_after_its_dependency_settles() {
        let mut a = step("a", "noop", &[]);
        a.options = json!({"output": {"greeting": "hi"}});
        let mut b = step("b", "noop", &["a"]);
        b.if_expr = Some("outputs.a.greeting === 'hi'".to_string());
        let plan = Plan {
            steps: vec![
                crate::planner::PlannedStep { config: a },
                crate::planner::PlannedStep { config: b },
            ],
            all_steps: HashMap::new(),
        };
        let engine = engine_for(plan.clone(), default_options()).await;
        let (groups, stats) = engine.run(&plan).await;
        assert_eq!(stats.succeeded, 2);
        assert_eq!(groups["a"].output, Some(json!({"greeting": "hi"})));
    }

    #[tokio::test]
    async fn a_failed_dependency_skips_its_dependent_without_continue_on_failure() {
        let a = step("a", "does-not-exist", &[]);
        let b = step("b", "noop", &["a"]);
        let plan = Plan {
            steps: vec![
                crate::planner::PlannedStep { config: a },
                crate::planner::PlannedStep { config: b },
            ],
            all_steps: HashMap::new(),
        };
        let engine = engine_for(plan.clone(), default_options()).await;
        let (_groups, stats) = engine.run(&plan).await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn continue_on_failure_lets_a_dependent_run_despite_a_failed_dependency() {
        let a = step("a", "does-not-exist", &[]);
        let mut b = step("b", "noop", &["a"]);
        b.continue_on_failure = true;
        let plan = Plan {
            steps: vec![
                crate::planner::PlannedStep { config: a },
                crate::planner::PlannedStep { config: b },
            ],
            all_steps: HashMap::new(),
        };
        let engine = engine_for(plan.clone(), default_options()).await;
        let (_groups, stats) = engine.run(&plan).await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn an_unresolved_session_fails_the_step_with_a_session_issue() {
        let mut a = step("a", "noop", &[]);
        a.reuse_ai_session = Some("ghost-session".to_string());
        let plan = Plan {
            steps: vec![crate::planner::PlannedStep { config: a }],
            all_steps: HashMap::new(),
        };
        let engine = engine_for(plan.clone(), default_options()).await;
        let (groups, stats) = engine.run(&plan).await;
        assert_eq!(stats.failed, 1);
        let summary = &groups["a"];
        assert!(summary.issues.iter().any(|i| i.rule_id == rule_ids::SESSION_UNRESOLVED));
    }

    #[tokio::test]
    async fn a_foreach_step_fans_its_map_dependent_out_per_item() {
        let mut list = step("list", "noop", &[]);
        list.for_each = true;
        list.options = json!({"output": ["a.rs", "b.rs"]});
        let item_check = step("per_item", "noop", &["list"]);
        // `per_item` is a map fanout dependent of `list`: it belongs in the
        // lookup table (`all_steps`) so `expand_foreach` can find it, but
        // not in the root-dispatched `steps` list, mirroring what
        // `Planner::plan` itself now excludes (see `Plan::steps` doc).
        let plan = Plan {
            steps: vec![crate::planner::PlannedStep { config: list.clone() }],
            all_steps: [("list".to_string(), list), ("per_item".to_string(), item_check)]
                .into_iter()
                .collect(),
        };
        let engine = engine_for(plan.clone(), default_options()).await;
        let (_groups, stats) = engine.run(&plan).await;
        // `list` itself, plus one `per_item` run per array entry.
        assert_eq!(stats.succeeded, 3);
    }
}
