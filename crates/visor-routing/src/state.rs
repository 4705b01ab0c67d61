use serde::{Deserialize, Serialize};

/// Per-(scope, step) state (§4.3). `Initialising` runs `on_init`;
/// `Evaluating` runs `assume`/`guarantee`/`fail_if` and then the
/// `on_success`/`on_fail` routing block before landing on a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Initialising,
    Running,
    Evaluating,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepState::Succeeded | StepState::Failed | StepState::Skipped | StepState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    IfFalse,
    Assume,
}
