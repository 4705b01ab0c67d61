//! Completion backends shared by the `ai` and `claude-code` provider types.
//! Adapted from the teacher's `OpenAICompatibleProvider`/`AnthropicProvider`
//! request bodies, collapsed from a full streaming multi-provider registry
//! down to the single-shot `complete()` call a check needs — no model
//! catalogue, no SSE parsing, since a check result is one `CheckResult`, not
//! a chat stream.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// No backend is configured: echoes the prompt back. Matches the teacher's
/// `LocalEchoProvider` fallback for an empty provider config, so `ai`/
/// `claude-code` checks remain runnable (and their DAG wiring testable)
/// without live credentials.
pub struct EchoBackend;

#[async_trait]
impl LlmBackend for EchoBackend {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(format!("Echo: {prompt}"))
    }
}

pub struct OpenAiCompatibleBackend {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub client: Client,
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut req = self.client.post(url).json(&json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "stream": false,
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: Value = response.json().await?;
        if let Some(detail) = extract_error(&value) {
            anyhow::bail!(detail);
        }
        if !status.is_success() {
            anyhow::bail!("provider request failed with status {status}");
        }
        extract_text(&value)
            .ok_or_else(|| anyhow::anyhow!("provider returned no completion content"))
    }
}

pub struct AnthropicBackend {
    pub api_key: Option<String>,
    pub model: String,
    pub client: Client,
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let mut req = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": 1024,
                "messages": [{"role": "user", "content": prompt}],
            }));
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let value: Value = req.send().await?.json().await?;
        let text = value["content"][0]["text"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("provider returned no completion content"))?;
        Ok(text.to_string())
    }
}

fn extract_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn extract_text(value: &Value) -> Option<String> {
    value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("message").or_else(|| choice.get("text")))
        .and_then(|m| m.get("content").or(Some(m)))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Resolves which backend an `ai`/`claude-code` check talks to from its
/// options (`provider`, `api_key`, `url`, `model`) and environment
/// variables, falling back to [`EchoBackend`] when nothing is configured —
/// the same "fall back to the only always-available provider" shape as the
/// teacher's `select_provider`/`build_providers`.
pub fn resolve_backend(options: &Value, default_provider: &str) -> Box<dyn LlmBackend> {
    let provider = options
        .get("provider")
        .and_then(Value::as_str)
        .unwrap_or(default_provider);
    let api_key = options
        .get("api_key")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| env_api_key_for(provider));
    let url = options.get("url").and_then(Value::as_str).map(str::to_string);

    if provider == "anthropic" || provider == "claude-code" {
        let Some(api_key) = api_key else {
            return Box::new(EchoBackend);
        };
        let model = options
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("claude-3-5-sonnet-latest")
            .to_string();
        return Box::new(AnthropicBackend {
            api_key: Some(api_key),
            model,
            client: Client::new(),
        });
    }

    let base_url = url.or_else(|| default_url_for(provider).map(str::to_string));
    match (base_url, api_key) {
        (Some(base_url), api_key) => {
            let model = options
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or("gpt-4o-mini")
                .to_string();
            Box::new(OpenAiCompatibleBackend {
                base_url,
                api_key,
                model,
                client: Client::new(),
            })
        }
        (None, _) => Box::new(EchoBackend),
    }
}

fn default_url_for(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "ollama" => Some("http://127.0.0.1:11434/v1"),
        _ => None,
    }
}

fn env_api_key_for(provider: &str) -> Option<String> {
    let env_name = match provider {
        "openai" => "OPENAI_API_KEY",
        "openrouter" => "OPENROUTER_API_KEY",
        "groq" => "GROQ_API_KEY",
        "mistral" => "MISTRAL_API_KEY",
        "together" => "TOGETHER_API_KEY",
        "anthropic" | "claude-code" => "ANTHROPIC_API_KEY",
        _ => return None,
    };
    std::env::var(env_name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unconfigured_provider_falls_back_to_echo() {
        std::env::remove_var("OPENAI_API_KEY");
        let backend = resolve_backend(&json!({}), "openai");
        let reply = backend.complete("hello").await.unwrap();
        assert_eq!(reply, "Echo: hello");
    }
}
