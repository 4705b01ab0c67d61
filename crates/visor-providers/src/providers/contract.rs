//! Provider types whose concrete bodies are out of scope (§1): the engine
//! must still recognise and dispatch them so plan validation and routing
//! behave identically whether a check is `noop` or `github`, but the actual
//! external integration (a live MCP server, GitHub API, a human waiting on a
//! prompt, a nested workflow run, a git worktree checkout) is an external
//! collaborator this core only defines the contract boundary for. Each
//! settles `Skipped` with a `debug` block naming what real integration work
//! remains, rather than panicking or silently no-opping like `noop`.

use async_trait::async_trait;
use serde_json::{json, Value};
use visor_types::CheckResult;

use crate::context::{DispatchContext, DispatchError};
use crate::provider::Provider;

fn contract_only(provider_type: &str, options: &Value) -> CheckResult {
    let mut result = CheckResult::skipped(format!("{provider_type} is implemented to its dispatch contract only"));
    result.debug = Some(json!({
        "provider_type": provider_type,
        "options": options,
        "note": "external integration not implemented in this core; see §1 non-goals",
    }));
    result
}

macro_rules! contract_provider {
    ($name:ident, $tag:literal) => {
        #[derive(Default)]
        pub struct $name;

        #[async_trait]
        impl Provider for $name {
            fn provider_type(&self) -> &'static str {
                $tag
            }

            fn validate(&self, _options: &Value) -> Result<(), DispatchError> {
                Ok(())
            }

            async fn execute(
                &self,
                _ctx: &DispatchContext,
                options: &Value,
            ) -> Result<CheckResult, DispatchError> {
                Ok(contract_only($tag, options))
            }
        }
    };
}

contract_provider!(McpProvider, "mcp");
contract_provider!(GithubProvider, "github");
contract_provider!(HumanInputProvider, "human-input");
contract_provider!(WorkflowProvider, "workflow");
contract_provider!(GitCheckoutProvider, "git-checkout");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;

    #[tokio::test]
    async fn contract_only_providers_settle_skipped_not_panic() {
        let ctx = test_ctx().await;
        let result = McpProvider.execute(&ctx, &json!({})).await.unwrap();
        assert!(matches!(result.status, visor_types::CheckStatus::Skipped));
        assert!(result.debug.is_some());
    }

    #[tokio::test]
    async fn each_contract_provider_reports_its_own_tag() {
        assert_eq!(McpProvider.provider_type(), "mcp");
        assert_eq!(GithubProvider.provider_type(), "github");
        assert_eq!(HumanInputProvider.provider_type(), "human-input");
        assert_eq!(WorkflowProvider.provider_type(), "workflow");
        assert_eq!(GitCheckoutProvider.provider_type(), "git-checkout");
    }
}
