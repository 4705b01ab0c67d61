use std::collections::HashMap;

use visor_types::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    #[error("loop budget exceeded")]
    LoopBudgetExceeded,
    #[error("max runs exceeded")]
    MaxRunsExceeded,
}

/// Bounds the total number of `goto`/`retry` transitions taken in a single
/// scope (§3 invariant 5, `routing.max_loops`, default 25).
pub struct LoopBudget {
    max_loops: u32,
    consumed: HashMap<Scope, u32>,
}

impl LoopBudget {
    pub fn new(max_loops: u32) -> Self {
        Self {
            max_loops,
            consumed: HashMap::new(),
        }
    }

    pub fn remaining(&self, scope: &Scope) -> u32 {
        self.max_loops
            .saturating_sub(*self.consumed.get(scope).unwrap_or(&0))
    }

    /// Consumes one unit of loop budget for `scope`. Errs without mutating
    /// state once the budget is already exhausted.
    pub fn consume(&mut self, scope: &Scope) -> Result<u32, BudgetError> {
        let used = self.consumed.entry(scope.clone()).or_insert(0);
        if *used >= self.max_loops {
            return Err(BudgetError::LoopBudgetExceeded);
        }
        *used += 1;
        Ok(*used)
    }
}

impl Default for LoopBudget {
    fn default() -> Self {
        Self::new(25)
    }
}

/// Caps total executions of a single step within a single scope (§3
/// invariant 6, `max_runs`, default 50 — see
/// [`visor_types::StepConfig::max_runs_or_default`]).
#[derive(Default)]
pub struct RunCounter {
    runs: HashMap<(Scope, String), u32>,
}

impl RunCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, scope: &Scope, step: &str) -> u32 {
        *self
            .runs
            .get(&(scope.clone(), step.to_string()))
            .unwrap_or(&0)
    }

    /// Records one execution of `step` in `scope`, erroring if `max_runs` is
    /// already met (the run that would exceed the cap never happens).
    pub fn record_run(&mut self, scope: &Scope, step: &str, max_runs: u32) -> Result<u32, BudgetError> {
        let key = (scope.clone(), step.to_string());
        let count = self.runs.entry(key).or_insert(0);
        if *count >= max_runs {
            return Err(BudgetError::MaxRunsExceeded);
        }
        *count += 1;
        Ok(*count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visor_types::EventType;

    #[test]
    fn loop_budget_exhausts_after_max_loops() {
        let scope = Scope::root(EventType::Manual);
        let mut budget = LoopBudget::new(2);
        assert!(budget.consume(&scope).is_ok());
        assert!(budget.consume(&scope).is_ok());
        assert!(matches!(
            budget.consume(&scope),
            Err(BudgetError::LoopBudgetExceeded)
        ));
    }

    #[test]
    fn loop_budget_is_scoped_independently() {
        let root = Scope::root(EventType::Manual);
        let child = root.child("item", 0);
        let mut budget = LoopBudget::new(1);
        assert!(budget.consume(&root).is_ok());
        assert!(budget.consume(&child).is_ok());
    }

    #[test]
    fn run_counter_exhausts_after_max_runs() {
        let scope = Scope::root(EventType::Manual);
        let mut counter = RunCounter::new();
        assert_eq!(counter.record_run(&scope, "lint", 1).unwrap(), 1);
        assert!(matches!(
            counter.record_run(&scope, "lint", 1),
            Err(BudgetError::MaxRunsExceeded)
        ));
    }
}
