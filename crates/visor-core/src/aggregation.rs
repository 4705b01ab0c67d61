//! Aggregation & Output Boundary (§4.11). Grounded on the teacher's
//! `MissionCommand::EmitNotice` pattern (structured event emission with
//! stable `event_type` strings) and `src-tauri/src/orchestrator/types.rs`'s
//! `RunSnapshot`/`TaskProgress` (summary statistics derived from the live
//! state tree).

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use visor_types::{CheckStatus, Issue};

/// One step's settled result, retained in declaration order so issue
/// ordering across the whole run stays stable (§4.11: step declaration
/// order, then emission order within a step).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub group: Option<String>,
    pub status: CheckStatus,
    pub output: Value,
    pub issues: Vec<Issue>,
    pub debug: Option<Value>,
}

/// Aggregated per-output-group view the engine emits at run end.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReviewSummary {
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
    pub debug: Option<Value>,
    pub output: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunStats {
    pub total_steps: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub routing_hops: u32,
    pub duration_ms: u128,
}

impl RunStats {
    /// Fraction of the run spent with every worker slot occupied — a crude
    /// parallelism-hit-rate signal for `--verbose` runs, not a scheduling
    /// input.
    pub fn parallelism_hit_rate(&self, max_parallelism: usize, busy_samples: usize, total_samples: usize) -> f64 {
        if max_parallelism == 0 || total_samples == 0 {
            return 0.0;
        }
        busy_samples as f64 / total_samples as f64
    }
}

/// Groups settled step outcomes into `ReviewSummary`s keyed by `group`
/// (absent group falls back to the step's own name), then derives
/// whole-run statistics. Issue ordering within and across groups follows
/// `outcomes`' order, which callers must already have in step-declaration
/// order with per-step issues in emission order.
pub fn aggregate(outcomes: &[StepOutcome], routing_hops: u32, duration: Duration) -> (HashMap<String, ReviewSummary>, RunStats) {
    let mut groups: HashMap<String, ReviewSummary> = HashMap::new();
    let mut stats = RunStats {
        total_steps: outcomes.len(),
        routing_hops,
        duration_ms: duration.as_millis(),
        ..Default::default()
    };

    for outcome in outcomes {
        match outcome.status {
            CheckStatus::Success => stats.succeeded += 1,
            CheckStatus::Failure => stats.failed += 1,
            CheckStatus::Skipped => stats.skipped += 1,
        }

        let key = outcome.group.clone().unwrap_or_else(|| outcome.step.clone());
        let summary = groups.entry(key).or_default();
        summary.issues.extend(outcome.issues.iter().cloned());
        for issue in &outcome.issues {
            if let Some(suggestion) = &issue.suggestion {
                summary.suggestions.push(suggestion.clone());
            }
        }
        if let Some(debug) = &outcome.debug {
            summary.debug = Some(debug.clone());
        }
        if !outcome.output.is_null() {
            summary.output = Some(outcome.output.clone());
        }
    }

    (groups, stats)
}

/// Whether the run's exit code should reflect failure (§6: exit 1 if any
/// enabled `fail_if` or `halt_execution` triggers, or any step settled
/// `Failed`). Issues attributed to `file: "system", line: 0` are hidden
/// from human formatters but still counted here (§7).
pub fn has_user_visible_failure(outcomes: &[StepOutcome]) -> bool {
    outcomes.iter().any(|o| o.status == CheckStatus::Failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use visor_types::Severity;

    fn outcome(step: &str, status: CheckStatus, group: Option<&str>) -> StepOutcome {
        StepOutcome {
            step: step.to_string(),
            group: group.map(str::to_string),
            status,
            output: Value::Null,
            issues: Vec::new(),
            debug: None,
        }
    }

    #[test]
    fn groups_default_to_step_name_when_ungrouped() {
        let outcomes = vec![outcome("lint", CheckStatus::Success, None)];
        let (groups, _) = aggregate(&outcomes, 0, Duration::from_secs(0));
        assert!(groups.contains_key("lint"));
    }

    #[test]
    fn issues_from_same_group_accumulate_in_order() {
        let mut a = outcome("lint", CheckStatus::Failure, Some("quality"));
        a.issues.push(Issue::system("fail_if", "first", Severity::Error));
        let mut b = outcome("format", CheckStatus::Failure, Some("quality"));
        b.issues.push(Issue::system("fail_if", "second", Severity::Error));
        let (groups, stats) = aggregate(&[a, b], 0, Duration::from_secs(0));
        let quality = &groups["quality"];
        assert_eq!(quality.issues.len(), 2);
        assert_eq!(quality.issues[0].message, "first");
        assert_eq!(quality.issues[1].message, "second");
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn user_visible_failure_detects_any_failed_step() {
        let outcomes = vec![
            outcome("lint", CheckStatus::Success, None),
            outcome("test", CheckStatus::Failure, None),
        ];
        assert!(has_user_visible_failure(&outcomes));
    }

    #[test]
    fn no_failure_when_every_step_settled_clean() {
        let outcomes = vec![outcome("lint", CheckStatus::Success, None), outcome("test", CheckStatus::Skipped, None)];
        assert!(!has_user_visible_failure(&outcomes));
    }
}
