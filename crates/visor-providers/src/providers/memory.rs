use async_trait::async_trait;
use serde_json::{json, Value};
use visor_types::CheckResult;

use crate::context::{DispatchContext, DispatchError};
use crate::provider::Provider;

const OPS: &[&str] = &[
    "get", "set", "append", "increment", "delete", "clear", "list", "get_all", "has",
];

/// Thin adapter over `visor_memory::MemoryStore`: one check invocation is
/// one operation (`options.op`) against one key/namespace. Writes here are
/// synchronous with respect to dependents scheduled after this step in the
/// same scope — the scheduler awaits this call before routing them (§4.7).
pub struct MemoryProvider;

#[async_trait]
impl Provider for MemoryProvider {
    fn provider_type(&self) -> &'static str {
        "memory"
    }

    fn validate(&self, options: &Value) -> Result<(), DispatchError> {
        let op = options.get("op").and_then(Value::as_str).ok_or_else(|| {
            DispatchError::InvalidOptions {
                check: String::new(),
                provider_type: "memory".to_string(),
                message: "`op` option is required".to_string(),
            }
        })?;
        if !OPS.contains(&op) {
            return Err(DispatchError::InvalidOptions {
                check: String::new(),
                provider_type: "memory".to_string(),
                message: format!("unknown memory op `{op}`, expected one of {OPS:?}"),
            });
        }
        let needs_key = !matches!(op, "clear" | "list" | "get_all");
        if needs_key && options.get("key").and_then(Value::as_str).is_none() {
            return Err(DispatchError::InvalidOptions {
                check: String::new(),
                provider_type: "memory".to_string(),
                message: format!("memory op `{op}` requires a `key` option"),
            });
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        let op = options.get("op").and_then(Value::as_str).unwrap_or("get");
        let key = options.get("key").and_then(Value::as_str).unwrap_or("");
        let ns = options.get("namespace").and_then(Value::as_str);
        let store = &ctx.memory;

        let output = match op {
            "get" => store.get(key, ns).await.unwrap_or(Value::Null),
            "has" => json!(store.has(key, ns).await),
            "set" => {
                let value = options.get("value").cloned().unwrap_or(Value::Null);
                store.set(key, value.clone(), ns).await?;
                value
            }
            "append" => {
                let value = options.get("value").cloned().unwrap_or(Value::Null);
                store.append(key, value, ns).await?
            }
            "increment" => {
                let amount = options.get("amount").and_then(Value::as_f64).unwrap_or(1.0);
                json!(store.increment(key, amount, ns).await?)
            }
            "delete" => json!(store.delete(key, ns).await?),
            "clear" => {
                store.clear(ns).await?;
                Value::Null
            }
            "list" => json!(store.list(ns).await),
            "get_all" => serde_json::to_value(store.get_all(ns).await).unwrap_or(Value::Null),
            other => {
                return Err(DispatchError::InvalidOptions {
                    check: ctx.check_name.clone(),
                    provider_type: "memory".to_string(),
                    message: format!("unknown memory op `{other}`"),
                });
            }
        };

        Ok(CheckResult::success(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let provider = MemoryProvider;
        let ctx = test_ctx().await;
        provider
            .execute(&ctx, &json!({"op": "set", "key": "k", "value": "v"}))
            .await
            .unwrap();
        let result = provider
            .execute(&ctx, &json!({"op": "get", "key": "k"}))
            .await
            .unwrap();
        assert_eq!(result.output, json!("v"));
    }

    #[tokio::test]
    async fn unknown_op_fails_validation() {
        let provider = MemoryProvider;
        assert!(provider.validate(&json!({"op": "frobnicate", "key": "k"})).is_err());
    }

    #[tokio::test]
    async fn clear_does_not_require_key() {
        let provider = MemoryProvider;
        assert!(provider.validate(&json!({"op": "clear"})).is_ok());
    }

    #[tokio::test]
    async fn increment_without_amount_defaults_to_one() {
        let provider = MemoryProvider;
        let ctx = test_ctx().await;
        let result = provider
            .execute(&ctx, &json!({"op": "increment", "key": "counter"}))
            .await
            .unwrap();
        assert_eq!(result.output, json!(1.0));
    }
}
