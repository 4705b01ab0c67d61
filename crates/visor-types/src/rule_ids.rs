//! Stable rule-ID strings (§7). Kept as plain constants rather than a closed
//! enum so `provider/*` free-form IDs remain representable without a
//! catch-all variant, mirroring the teacher's string-classified provider
//! error codes.

pub const SYSTEM_TIMEOUT: &str = "system/timeout";
pub const SYSTEM_API_KEY_MISSING: &str = "system/api-key-missing";
pub const SYSTEM_AI_EXECUTION_ERROR: &str = "system/ai-execution-error";
pub const SYSTEM_AI_SESSION_REUSE_ERROR: &str = "system/ai-session-reuse-error";
pub const SYSTEM_FOREACH_EXPECTED_ARRAY: &str = "system/foreach_expected_array";
pub const SYSTEM_INVALID_OPTIONS: &str = "system/invalid_options";

pub const PLAN_UNKNOWN_PROVIDER_TYPE: &str = "plan/unknown_provider_type";

pub const ROUTING_LOOP_BUDGET_EXCEEDED: &str = "routing/loop_budget_exceeded";
pub const ROUTING_MAX_RUNS_EXCEEDED: &str = "routing/max_runs_exceeded";
pub const ROUTING_RETRY_EXHAUSTED: &str = "routing/retry_exhausted";

pub const CONTRACT_GUARANTEE_FAILED: &str = "contract/guarantee_failed";

pub const PLAN_CYCLE: &str = "plan/cycle";
pub const PLAN_UNRESOLVED_DEPENDENCY: &str = "plan/unresolved_dependency";
pub const PLAN_CRITICALITY_MISSING_GUARANTEE: &str = "plan/criticality_missing_guarantee";

pub const SESSION_UNRESOLVED: &str = "session/unresolved";

pub const FAIL_IF: &str = "fail_if";
