//! Plan construction (§4.1). Grounded on `src-tauri/src/orchestrator/
//! scheduler.rs`'s `TaskScheduler::detect_cycle` (DFS-with-path) and
//! `validate` (duplicate/unresolved-dependency checks), generalised from a
//! flat task list to named steps carrying their own `on`/`tag_filter`/
//! `triggers` gates.

use std::collections::{HashMap, HashSet};

use visor_types::{rule_ids, Criticality, Event, StepConfig};
use visor_workspace::matches_triggers;

use crate::config::TagFilter;
use crate::error::PlanError;

/// One step as it appears in the plan, topologically ordered so that
/// `depends_on` always precedes its dependents.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub config: StepConfig,
}

#[derive(Debug, Clone)]
pub struct Plan {
    /// Steps in dependency order (depends_on precedes dependent), excluding
    /// any step that `depends_on` a `forEach` step (§4.9). Those are fanout
    /// dependents: the scheduler resolves them itself, once per item (`map`)
    /// or once at the parent scope over the aggregate (`reduce`), inside
    /// `expand_foreach` — never through the generic depends_on edge at the
    /// scope they were declared in, which would otherwise run them an extra,
    /// spurious time before any item exists.
    pub steps: Vec<PlannedStep>,
    /// Every step admitted by the tag filter and triggers gate, regardless
    /// of whether its `on` list matches the run's root event. The scheduler
    /// needs this superset (not just `steps`) to resolve `goto`/`goto_event`
    /// targets that only match a *different* event than the one the run was
    /// triggered under (§4.3, §8 scenario "cross-event isolation") — without
    /// it, a `goto_event` jump to a step gated on another event would find
    /// no such step declared and settle it as an unresolved dependency.
    pub all_steps: HashMap<String, StepConfig>,
}

impl Plan {
    pub fn step(&self, name: &str) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.config.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

pub struct Planner;

impl Planner {
    /// Builds a plan from every declared step (§4.1 steps 1-4, 6-7). The
    /// `if` predicate (step 5) is deferred to scheduling time because it can
    /// read `outputs`, which doesn't exist until dependencies have run — see
    /// `visor_routing::RoutingStateMachine::enter_pending`.
    pub fn plan(
        all_steps: &HashMap<String, StepConfig>,
        event: &Event,
        tag_filter: &TagFilter,
        requested_checks: &[String],
        changed_files: &[String],
    ) -> Result<Plan, PlanError> {
        // Step 2: tag filter. Step 4: triggers glob gate. Applied without the
        // event filter first so a `goto_event` target gated on a different
        // event stays resolvable from `all_steps` below.
        let tag_and_trigger_admitted: HashMap<String, StepConfig> = all_steps
            .iter()
            .filter(|(_, step)| tag_filter.admits(&step.tags))
            .filter(|(_, step)| matches_triggers(&step.triggers, changed_files).unwrap_or(true))
            .map(|(name, step)| (name.clone(), step.clone()))
            .collect();

        // Step 1: event filter, applied on top for the root dispatch set.
        let mut admitted: HashMap<String, StepConfig> = tag_and_trigger_admitted
            .iter()
            .filter(|(_, step)| step.matches_event(event.event_type))
            .map(|(name, step)| (name.clone(), step.clone()))
            .collect();

        // Step 3: restrict to requested checks plus their transitive
        // dependencies, resolved against the pre-filter step set so a
        // requested check's dependency isn't silently dropped by the tag
        // filter before we can walk its `depends_on` edges.
        if !requested_checks.is_empty() {
            for name in requested_checks {
                if !all_steps.contains_key(name) {
                    return Err(PlanError::UnknownRequestedCheck(name.clone()));
                }
            }
            let closure = transitive_closure(requested_checks, all_steps);
            admitted.retain(|name, _| closure.contains(name));
            // A requested check's dependency may have been filtered out by
            // event/tag/triggers gates above; pull it back in since the
            // scheduler cannot run the requested check without it.
            for name in &closure {
                if !admitted.contains_key(name) {
                    if let Some(step) = all_steps.get(name) {
                        admitted.insert(name.clone(), step.clone());
                    }
                }
            }
        }

        // Unresolved dependency check against the admitted set.
        for step in admitted.values() {
            for dep in &step.depends_on {
                if !admitted.contains_key(dep) {
                    return Err(PlanError::UnresolvedDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        for step in admitted.values() {
            warn_if_criticality_lacks_contract(step);
        }

        let ordered = topo_sort(&admitted)?;
        // Fanout dependents of a `forEach` step are dispatched exclusively
        // by `expand_foreach`; keep them out of the root-level list so the
        // scheduler doesn't also resolve them directly via their depends_on
        // edge (see `Plan::steps` doc).
        let is_foreach_dependent = |cfg: &StepConfig| {
            cfg.depends_on
                .iter()
                .any(|dep| admitted.get(dep).map(|d| d.for_each).unwrap_or(false))
        };
        let steps = ordered
            .into_iter()
            .filter(|config| !is_foreach_dependent(config))
            .map(|config| PlannedStep { config })
            .collect();
        Ok(Plan {
            steps,
            all_steps: tag_and_trigger_admitted,
        })
    }
}

/// External/internal steps are the ones standing in for a real contract with
/// the outside world or another module; one declaring neither `fail_if` nor
/// `guarantee` has no way to actually fail on a broken promise, so it's
/// flagged rather than silently accepted (§4.1 step 7).
fn warn_if_criticality_lacks_contract(step: &StepConfig) {
    let is_load_bearing = matches!(step.criticality, Some(Criticality::External) | Some(Criticality::Internal));
    if is_load_bearing && step.fail_if.is_none() && step.guarantee.is_empty() {
        tracing::warn!(
            step = %step.name,
            criticality = ?step.criticality,
            rule = rule_ids::PLAN_CRITICALITY_MISSING_GUARANTEE,
            "step declares a criticality but no fail_if or guarantee to enforce it"
        );
    }
}

fn transitive_closure(roots: &[String], all_steps: &HashMap<String, StepConfig>) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = roots.to_vec();
    while let Some(name) = stack.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(step) = all_steps.get(&name) {
            for dep in &step.depends_on {
                stack.push(dep.clone());
            }
        }
    }
    seen
}

/// Kahn-style topological sort with a DFS-based cycle report when no step
/// is ready, so the reported cycle names the steps actually involved.
fn topo_sort(steps: &HashMap<String, StepConfig>) -> Result<Vec<StepConfig>, PlanError> {
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for (name, step) in steps {
        in_degree.entry(name.clone()).or_insert(0);
        for dep in &step.depends_on {
            *in_degree.entry(name.clone()).or_insert(0) += 1;
            dependents.entry(dep.clone()).or_default().push(name.clone());
        }
    }

    // Stable order: declaration order within each layer, approximated here
    // by sorted name so output is deterministic across runs (declaration
    // order itself is not preserved by a `HashMap`; the scheduler's ready
    // queue is what actually provides FIFO/declaration tie-breaks at
    // dispatch time per §4.2).
    let mut ready: Vec<String> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| name.clone())
        .collect();
    ready.sort();

    let mut ordered = Vec::with_capacity(steps.len());
    let mut queue = std::collections::VecDeque::from(ready);
    let mut visited: HashSet<String> = HashSet::new();

    while let Some(name) = queue.pop_front() {
        if !visited.insert(name.clone()) {
            continue;
        }
        ordered.push(steps[&name].clone());
        if let Some(next) = dependents.get(&name) {
            let mut newly_ready = Vec::new();
            for dependent in next {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(dependent.clone());
                }
            }
            newly_ready.sort();
            for name in newly_ready {
                queue.push_back(name);
            }
        }
    }

    if ordered.len() != steps.len() {
        let remaining: Vec<String> = steps
            .keys()
            .filter(|name| !visited.contains(*name))
            .cloned()
            .collect();
        return Err(PlanError::Cycle(remaining.join(", ")));
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use visor_types::EventType;

    fn step(name: &str, depends_on: &[&str]) -> StepConfig {
        StepConfig {
            name: name.to_string(),
            check_type: "noop".to_string(),
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

    fn steps(list: Vec<StepConfig>) -> HashMap<String, StepConfig> {
        list.into_iter().map(|s| (s.name.clone(), s)).collect()
    }

    #[test]
    fn dependency_order_is_respected() {
        let all = steps(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]);
        let plan = Planner::plan(&all, &Event::new(EventType::Manual), &TagFilter::default(), &[], &[]).unwrap();
        let order: Vec<&str> = plan.steps.iter().map(|s| s.config.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut a = step("a", &["b"]);
        let b = step("b", &["a"]);
        a.depends_on = vec!["b".to_string()];
        let all = steps(vec![a, b]);
        let err = Planner::plan(&all, &Event::new(EventType::Manual), &TagFilter::default(), &[], &[]).unwrap_err();
        assert!(matches!(err, PlanError::Cycle(_)));
    }

    #[test]
    fn unresolved_dependency_is_rejected() {
        let all = steps(vec![step("a", &["ghost"])]);
        let err = Planner::plan(&all, &Event::new(EventType::Manual), &TagFilter::default(), &[], &[]).unwrap_err();
        assert!(matches!(err, PlanError::UnresolvedDependency { .. }));
    }

    #[test]
    fn event_filter_excludes_non_matching_steps() {
        let mut pr_only = step("pr_check", &[]);
        pr_only.on = vec![EventType::PrOpened];
        let all = steps(vec![pr_only]);
        let plan = Planner::plan(&all, &Event::new(EventType::Manual), &TagFilter::default(), &[], &[]).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn requested_checks_pull_in_transitive_dependencies() {
        let all = steps(vec![step("a", &[]), step("b", &["a"]), step("c", &[])]);
        let plan = Planner::plan(
            &all,
            &Event::new(EventType::Manual),
            &TagFilter::default(),
            &["b".to_string()],
            &[],
        )
        .unwrap();
        let names: HashSet<String> = plan.steps.iter().map(|s| s.config.name.clone()).collect();
        assert!(names.contains("a"));
        assert!(names.contains("b"));
        assert!(!names.contains("c"));
    }

    #[test]
    fn triggers_gate_excludes_steps_with_no_matching_changed_file() {
        let mut gated = step("docs_lint", &[]);
        gated.triggers = vec!["docs/**/*.md".to_string()];
        let all = steps(vec![gated]);
        let plan = Planner::plan(
            &all,
            &Event::new(EventType::Manual),
            &TagFilter::default(),
            &[],
            &["src/lib.rs".to_string()],
        )
        .unwrap();
        assert!(plan.is_empty());
    }
}
