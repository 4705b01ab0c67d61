use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use visor_types::{rule_ids, CheckResult, Issue, Severity, StepConfig};

use crate::context::{DispatchContext, DispatchError};
use crate::provider::Provider;
use crate::providers::{
    ClaudeCodeProvider, CommandProvider, GitCheckoutProvider, GithubProvider, HttpClientProvider,
    HttpInputProvider, HttpProvider, HumanInputProvider, LlmProvider, LogProvider, McpProvider,
    MemoryProvider, NoopProvider, ScriptProvider, WorkflowProvider,
};

/// String-tag-keyed registry of provider implementations (§4.4). Keyed on
/// the exact tag spelling the spec's registered-types list uses (some
/// hyphenated, some underscored) — a small alias table normalizes the
/// spellings operators actually type before falling back to the canonical
/// lookup, mirroring the teacher's `ToolRegistry` alias normalization.
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Builds the registry with every built-in provider type wired in.
    /// There is no user-extensible registration surface (§1 non-goals
    /// exclude concrete provider bodies beyond the contract; what ships
    /// here is the fixed, always-available set of 15).
    pub fn with_builtins() -> Self {
        let mut providers: HashMap<&'static str, Arc<dyn Provider>> = HashMap::new();
        let all: Vec<Arc<dyn Provider>> = vec![
            Arc::new(NoopProvider),
            Arc::new(LogProvider),
            Arc::new(MemoryProvider),
            Arc::new(CommandProvider),
            Arc::new(ScriptProvider),
            Arc::new(HttpProvider::default()),
            Arc::new(HttpClientProvider::default()),
            Arc::new(HttpInputProvider::default()),
            Arc::new(LlmProvider::new("ai")),
            Arc::new(ClaudeCodeProvider::default()),
            Arc::new(McpProvider),
            Arc::new(GithubProvider),
            Arc::new(HumanInputProvider),
            Arc::new(WorkflowProvider),
            Arc::new(GitCheckoutProvider),
        ];
        for provider in all {
            providers.insert(provider.provider_type(), provider);
        }
        Self { providers }
    }

    pub fn resolve(&self, check_type: &str) -> Result<Arc<dyn Provider>, DispatchError> {
        let canonical = normalize_alias(check_type);
        self.providers
            .get(canonical.as_str())
            .cloned()
            .ok_or_else(|| DispatchError::UnknownProviderType(check_type.to_string()))
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.providers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Per-check timeout applied when a step's YAML omits `timeout:` (§4.2): 60s
/// for everything, 600s for the AI providers whose calls routinely run long.
fn default_timeout_ms(provider_type: &str) -> u64 {
    match provider_type {
        "ai" | "claude-code" => 600_000,
        _ => 60_000,
    }
}

/// A handful of spellings operators reach for that aren't the canonical tag
/// (underscore vs. hyphen). Anything else passes through unchanged so the
/// exact tag list in §4.4 (which itself mixes both styles) still resolves.
fn normalize_alias(check_type: &str) -> String {
    let lower = check_type.trim().to_lowercase();
    match lower.as_str() {
        "claude_code" => "claude-code".to_string(),
        "git_checkout" => "git-checkout".to_string(),
        "human_input" => "human-input".to_string(),
        other => other.to_string(),
    }
}

/// Looks up a provider by declared type, validates options, invokes it,
/// enforces the step's timeout, and normalises whatever comes back into a
/// `CheckResult` — providers never see the rest of the scheduler, and the
/// scheduler never sees a provider's raw error type.
pub struct Dispatcher {
    registry: Arc<ProviderRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, step: &StepConfig, ctx: &DispatchContext) -> CheckResult {
        let provider = match self.registry.resolve(&step.check_type) {
            Ok(provider) => provider,
            Err(err) => {
                return CheckResult::failure(vec![Issue::system(
                    rule_ids::PLAN_UNKNOWN_PROVIDER_TYPE,
                    err.to_string(),
                    Severity::Error,
                )]);
            }
        };

        if let Err(err) = provider.validate(&step.options) {
            return CheckResult::failure(vec![Issue::system(
                rule_ids::SYSTEM_INVALID_OPTIONS,
                err.to_string(),
                Severity::Error,
            )]);
        }

        let timeout_ms = step.timeout.unwrap_or_else(|| default_timeout_ms(provider.provider_type()));
        let execution = provider.execute(ctx, &step.options);
        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), execution)
            .await
            .unwrap_or_else(|_| Err(DispatchError::Timeout(Duration::from_millis(timeout_ms))));

        match outcome {
            Ok(result) => result,
            Err(DispatchError::Timeout(duration)) => CheckResult::failure(vec![Issue::system(
                rule_ids::SYSTEM_TIMEOUT,
                format!("check `{}` timed out after {:?}", step.name, duration),
                Severity::Error,
            )]),
            Err(err) => CheckResult::failure(vec![Issue::system(
                "provider/execution_error",
                err.to_string(),
                Severity::Error,
            )]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_spec_registered_type_resolves() {
        let registry = ProviderRegistry::with_builtins();
        for ty in [
            "ai",
            "claude-code",
            "mcp",
            "command",
            "http",
            "http_input",
            "http_client",
            "memory",
            "noop",
            "log",
            "github",
            "human-input",
            "workflow",
            "git-checkout",
            "script",
        ] {
            assert!(registry.resolve(ty).is_ok(), "expected `{ty}` to resolve");
        }
    }

    #[test]
    fn alias_spellings_normalize_to_canonical_tag() {
        let registry = ProviderRegistry::with_builtins();
        assert_eq!(
            registry.resolve("claude_code").unwrap().provider_type(),
            "claude-code"
        );
    }

    #[test]
    fn unknown_type_is_a_plan_time_error() {
        let registry = ProviderRegistry::with_builtins();
        let err = registry.resolve("does-not-exist").unwrap_err();
        assert!(matches!(err, DispatchError::UnknownProviderType(t) if t == "does-not-exist"));
    }
}
