use async_trait::async_trait;
use serde_json::Value;
use visor_session::{Message, Role};
use visor_types::{rule_ids, CheckResult, Issue, Severity};

use crate::context::{DispatchContext, DispatchError};
use crate::llm::resolve_backend;
use crate::provider::Provider;

/// Backs both the `ai` and `claude-code` provider types: resolves a
/// completion backend from options/environment (§4.6's session registry is
/// consulted when `reuse_ai_session` is set), runs the prompt, and surfaces
/// the (possibly brand new) session id on `CheckResult.session_id` so the
/// scheduler's routing/reuse bookkeeping always reads one field regardless
/// of which provider produced it.
pub struct LlmProvider {
    provider_tag: &'static str,
    default_backend: &'static str,
}

impl LlmProvider {
    pub fn new(provider_tag: &'static str) -> Self {
        Self {
            provider_tag,
            default_backend: "openai",
        }
    }
}

#[async_trait]
impl Provider for LlmProvider {
    fn provider_type(&self) -> &'static str {
        self.provider_tag
    }

    fn validate(&self, options: &Value) -> Result<(), DispatchError> {
        match options.get("prompt").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => Ok(()),
            _ => Err(DispatchError::InvalidOptions {
                check: String::new(),
                provider_type: self.provider_tag.to_string(),
                message: "`prompt` option must be a non-empty string".to_string(),
            }),
        }
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        complete(ctx, options, self.default_backend).await
    }
}

/// The `claude-code` tag: same dispatch shape as `ai`, defaulting the
/// resolved backend to Anthropic rather than an OpenAI-compatible endpoint.
#[derive(Default)]
pub struct ClaudeCodeProvider;

#[async_trait]
impl Provider for ClaudeCodeProvider {
    fn provider_type(&self) -> &'static str {
        "claude-code"
    }

    fn validate(&self, options: &Value) -> Result<(), DispatchError> {
        match options.get("prompt").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => Ok(()),
            _ => Err(DispatchError::InvalidOptions {
                check: String::new(),
                provider_type: "claude-code".to_string(),
                message: "`prompt` option must be a non-empty string".to_string(),
            }),
        }
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        complete(ctx, options, "claude-code").await
    }
}

async fn complete(
    ctx: &DispatchContext,
    options: &Value,
    default_backend: &str,
) -> Result<CheckResult, DispatchError> {
    let prompt = options.get("prompt").and_then(Value::as_str).unwrap_or_default();
    let backend = resolve_backend(options, default_backend);

    let reply = match backend.complete(prompt).await {
        Ok(reply) => reply,
        Err(err) => {
            return Ok(CheckResult::failure(vec![Issue::system(
                rule_ids::SYSTEM_AI_EXECUTION_ERROR,
                err.to_string(),
                Severity::Error,
            )]));
        }
    };

    let session_id = match &ctx.session_id {
        Some(id) => {
            ctx.sessions
                .append_message(id, Message::new(Role::User, prompt))
                .await?;
            ctx.sessions
                .append_message(id, Message::new(Role::Assistant, reply.clone()))
                .await?;
            id.clone()
        }
        None => {
            let id = format!("session-{}", ctx.check_name);
            ctx.sessions
                .register(
                    id.clone(),
                    vec![
                        Message::new(Role::User, prompt),
                        Message::new(Role::Assistant, reply.clone()),
                    ],
                )
                .await;
            id
        }
    };

    Ok(CheckResult::success(Value::String(reply)).with_session_id(session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;
    use serde_json::json;

    #[tokio::test]
    async fn ai_without_configured_backend_echoes_and_mints_a_session() {
        std::env::remove_var("OPENAI_API_KEY");
        let provider = LlmProvider::new("ai");
        let ctx = test_ctx().await;
        let result = provider
            .execute(&ctx, &json!({"prompt": "hello"}))
            .await
            .unwrap();
        assert_eq!(result.output, json!("Echo: hello"));
        assert!(result.session_id.is_some());
    }

    #[tokio::test]
    async fn reused_session_appends_to_existing_history() {
        std::env::remove_var("OPENAI_API_KEY");
        let provider = LlmProvider::new("ai");
        let mut ctx = test_ctx().await;
        ctx.sessions.register("parent", vec![]).await;
        ctx.session_id = Some("parent".to_string());

        let result = provider
            .execute(&ctx, &json!({"prompt": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.session_id, Some("parent".to_string()));
        let history = ctx.sessions.history("parent").await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn prompt_option_is_required() {
        let provider = LlmProvider::new("ai");
        assert!(provider.validate(&json!({})).is_err());
    }
}
