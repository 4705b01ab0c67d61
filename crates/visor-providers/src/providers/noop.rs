use async_trait::async_trait;
use serde_json::Value;
use visor_types::CheckResult;

use crate::context::{DispatchContext, DispatchError};
use crate::provider::Provider;

/// Produces no side effects; used for pure DAG wiring (fan-in/fan-out
/// scaffolding, tests). `options.output`, if present, becomes the check's
/// output verbatim, otherwise the output is `null`.
pub struct NoopProvider;

#[async_trait]
impl Provider for NoopProvider {
    fn provider_type(&self) -> &'static str {
        "noop"
    }

    fn validate(&self, _options: &Value) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn execute(
        &self,
        _ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        let output = options.get("output").cloned().unwrap_or(Value::Null);
        Ok(CheckResult::success(output))
    }
}

/// Emits a `tracing` event at the declared level and succeeds with the
/// interpolated message as its output. Useful as a routing `run` remediation
/// step that just needs to leave a breadcrumb.
pub struct LogProvider;

#[async_trait]
impl Provider for LogProvider {
    fn provider_type(&self) -> &'static str {
        "log"
    }

    fn validate(&self, options: &Value) -> Result<(), DispatchError> {
        match options.get("message").and_then(Value::as_str) {
            Some(_) => Ok(()),
            None => Err(DispatchError::InvalidOptions {
                check: String::new(),
                provider_type: "log".to_string(),
                message: "`message` option must be a string".to_string(),
            }),
        }
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        let message = options
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let level = options
            .get("level")
            .and_then(Value::as_str)
            .unwrap_or("info");
        match level {
            "warn" => tracing::warn!(check = %ctx.check_name, "{message}"),
            "error" => tracing::error!(check = %ctx.check_name, "{message}"),
            "debug" => tracing::debug!(check = %ctx.check_name, "{message}"),
            _ => tracing::info!(check = %ctx.check_name, "{message}"),
        }
        Ok(CheckResult::success(Value::String(message.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;
    use serde_json::json;

    #[tokio::test]
    async fn noop_echoes_declared_output() {
        let provider = NoopProvider;
        let ctx = test_ctx().await;
        let result = provider
            .execute(&ctx, &json!({"output": {"x": 1}}))
            .await
            .unwrap();
        assert_eq!(result.output, json!({"x": 1}));
    }

    #[tokio::test]
    async fn noop_defaults_to_null_output() {
        let provider = NoopProvider;
        let ctx = test_ctx().await;
        let result = provider.execute(&ctx, &json!({})).await.unwrap();
        assert_eq!(result.output, Value::Null);
    }

    #[tokio::test]
    async fn log_requires_message_option() {
        let provider = LogProvider;
        assert!(provider.validate(&json!({})).is_err());
        assert!(provider.validate(&json!({"message": "hi"})).is_ok());
    }

    #[tokio::test]
    async fn log_returns_message_as_output() {
        let provider = LogProvider;
        let ctx = test_ctx().await;
        let result = provider
            .execute(&ctx, &json!({"message": "hello"}))
            .await
            .unwrap();
        assert_eq!(result.output, json!("hello"));
    }
}
