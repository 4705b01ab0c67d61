use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use visor_types::{CheckResult, Issue, Severity};

use crate::context::{DispatchContext, DispatchError};
use crate::provider::Provider;

fn require_url(options: &Value, provider_type: &str) -> Result<(), DispatchError> {
    match options.get("url").and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(DispatchError::InvalidOptions {
            check: String::new(),
            provider_type: provider_type.to_string(),
            message: "`url` option must be a non-empty string".to_string(),
        }),
    }
}

async fn request(
    client: &Client,
    options: &Value,
    url: &str,
) -> Result<CheckResult, DispatchError> {
    let method = options
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .parse::<Method>()
        .unwrap_or(Method::GET);

    let mut req = client.request(method, url);
    if let Some(headers) = options.get("headers").and_then(Value::as_object) {
        for (key, value) in headers {
            if let Some(value) = value.as_str() {
                req = req.header(key.as_str(), value);
            }
        }
    }
    if let Some(body) = options.get("body") {
        req = req.json(body);
    }
    if let Some(timeout_ms) = options.get("timeout_ms").and_then(Value::as_u64) {
        req = req.timeout(Duration::from_millis(timeout_ms));
    }

    let response = req.send().await.map_err(|e| DispatchError::Provider(e.into()))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

    if !status.is_success() {
        return Ok(CheckResult::failure(vec![Issue::system(
            "provider/http_error",
            format!("request to `{url}` failed with status {status}"),
            Severity::Error,
        )]));
    }
    Ok(CheckResult::success(body))
}

/// One-shot arbitrary HTTP request: method, headers, and a JSON body are all
/// options-driven. The response body is parsed as JSON when possible, else
/// kept as a raw string.
pub struct HttpProvider {
    client: Client,
}

impl Default for HttpProvider {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn provider_type(&self) -> &'static str {
        "http"
    }

    fn validate(&self, options: &Value) -> Result<(), DispatchError> {
        require_url(options, "http")
    }

    async fn execute(
        &self,
        _ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        let url = options.get("url").and_then(Value::as_str).unwrap_or_default();
        request(&self.client, options, url).await
    }
}

/// Same wire contract as `http`, plus a bounded retry loop (`retries`,
/// `retry_delay_ms`) for calls to services expected to flake — a thin
/// resilience wrapper rather than a distinct protocol.
pub struct HttpClientProvider {
    client: Client,
}

impl Default for HttpClientProvider {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Provider for HttpClientProvider {
    fn provider_type(&self) -> &'static str {
        "http_client"
    }

    fn validate(&self, options: &Value) -> Result<(), DispatchError> {
        require_url(options, "http_client")
    }

    async fn execute(
        &self,
        _ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        let url = options.get("url").and_then(Value::as_str).unwrap_or_default();
        let retries = options.get("retries").and_then(Value::as_u64).unwrap_or(0);
        let delay_ms = options.get("retry_delay_ms").and_then(Value::as_u64).unwrap_or(0);

        let mut attempt = 0;
        loop {
            let result = request(&self.client, options, url).await?;
            let failed = matches!(result.status, visor_types::CheckStatus::Failure);
            if !failed || attempt >= retries {
                return Ok(result);
            }
            attempt += 1;
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

/// Fetches a single value from a URL and uses it verbatim as the check's
/// output (GET-only) — for pulling externally-hosted input (a config blob,
/// a generated artifact manifest) into the outputs map.
pub struct HttpInputProvider {
    client: Client,
}

impl Default for HttpInputProvider {
    fn default() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Provider for HttpInputProvider {
    fn provider_type(&self) -> &'static str {
        "http_input"
    }

    fn validate(&self, options: &Value) -> Result<(), DispatchError> {
        require_url(options, "http_input")
    }

    async fn execute(
        &self,
        _ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        let url = options.get("url").and_then(Value::as_str).unwrap_or_default();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DispatchError::Provider(e.into()))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Ok(CheckResult::failure(vec![Issue::system(
                "provider/http_error",
                format!("input fetch from `{url}` failed with status {status}"),
                Severity::Error,
            )]));
        }
        let value = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(CheckResult::success(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_variants_require_url() {
        assert!(require_url(&Value::Null, "http").is_err());
        assert!(require_url(&serde_json::json!({"url": "https://x"}), "http").is_ok());
    }
}
