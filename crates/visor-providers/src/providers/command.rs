use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use visor_types::{rule_ids, CheckResult, Issue, Severity};

use crate::context::{DispatchContext, DispatchError};
use crate::provider::Provider;

/// Runs a single command + argument vector in the run's workspace. Honours
/// cancellation cooperatively: if the token fires while the child is still
/// running, the child is killed and the step settles `Skipped`.
pub struct CommandProvider;

#[async_trait]
impl Provider for CommandProvider {
    fn provider_type(&self) -> &'static str {
        "command"
    }

    fn validate(&self, options: &Value) -> Result<(), DispatchError> {
        require_string(options, "command", "command")
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        let command = options.get("command").and_then(Value::as_str).unwrap_or_default();
        let args = string_array(options.get("args"));
        run(ctx, options, command, &args).await
    }
}

/// Runs a multi-line script through an interpreter (`sh` by default). Unlike
/// `command`, the script body is written to a temp file in the workspace so
/// operators can author multi-statement shell/python/etc. bodies inline in
/// config rather than flattening them into a single `command` string.
pub struct ScriptProvider;

#[async_trait]
impl Provider for ScriptProvider {
    fn provider_type(&self) -> &'static str {
        "script"
    }

    fn validate(&self, options: &Value) -> Result<(), DispatchError> {
        require_string(options, "script", "script")
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        options: &Value,
    ) -> Result<CheckResult, DispatchError> {
        let script = options.get("script").and_then(Value::as_str).unwrap_or_default();
        let interpreter = options
            .get("interpreter")
            .and_then(Value::as_str)
            .unwrap_or("sh");

        let file_name = format!(".visor-script-{}", uuid_like());
        let script_path = ctx.working_directory.join(&file_name);
        tokio::fs::write(&script_path, script)
            .await
            .map_err(|e| DispatchError::Provider(e.into()))?;

        let mut args = vec![script_path.display().to_string()];
        args.extend(string_array(options.get("args")));

        let result = run(ctx, options, interpreter, &args).await;
        let _ = tokio::fs::remove_file(&script_path).await;
        result
    }
}

fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{nanos:x}")
}

fn require_string(options: &Value, field: &str, provider_type: &str) -> Result<(), DispatchError> {
    match options.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(DispatchError::InvalidOptions {
            check: String::new(),
            provider_type: provider_type.to_string(),
            message: format!("`{field}` option must be a non-empty string"),
        }),
    }
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

async fn run(
    ctx: &DispatchContext,
    options: &Value,
    program: &str,
    args: &[String],
) -> Result<CheckResult, DispatchError> {
    let cwd = options
        .get("cwd")
        .and_then(Value::as_str)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| ctx.working_directory.clone());

    let mut command = Command::new(program);
    command.args(args).current_dir(&cwd).kill_on_drop(true);
    if let Some(env) = options.get("env").and_then(Value::as_object) {
        for (key, value) in env {
            if let Some(value) = value.as_str() {
                command.env(key, value);
            }
        }
    }
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    let child = command.spawn().map_err(|e| DispatchError::Provider(e.into()))?;

    let output = tokio::select! {
        output = child.wait_with_output() => output.map_err(|e| DispatchError::Provider(e.into()))?,
        _ = ctx.cancellation.cancelled() => {
            return Ok(CheckResult::skipped("cancelled"));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        return Ok(CheckResult::failure(vec![Issue::system(
            "provider/command_failed",
            format!(
                "`{program}` exited with {:?}: {stderr}",
                output.status.code()
            ),
            Severity::Error,
        )]));
    }

    let output_format = options.get("output_format").and_then(Value::as_str);
    if output_format == Some("json") {
        match serde_json::from_str::<Value>(&stdout) {
            Ok(parsed) => return Ok(CheckResult::success(parsed)),
            Err(err) => {
                let mut result = CheckResult::success(Value::String(stdout));
                result.issues.push(Issue::system(
                    rule_ids::SYSTEM_INVALID_OPTIONS,
                    format!("output_format: json requested but stdout did not parse: {err}"),
                    Severity::Warning,
                ));
                return Ok(result);
            }
        }
    }

    Ok(CheckResult::success(Value::String(stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ctx;
    use serde_json::json;

    #[tokio::test]
    async fn command_captures_stdout() {
        let provider = CommandProvider;
        let ctx = test_ctx().await;
        let result = provider
            .execute(&ctx, &json!({"command": "echo", "args": ["hello"]}))
            .await
            .unwrap();
        assert_eq!(result.output, json!("hello"));
    }

    #[tokio::test]
    async fn command_failure_surfaces_as_check_failure() {
        let provider = CommandProvider;
        let ctx = test_ctx().await;
        let result = provider
            .execute(&ctx, &json!({"command": "sh", "args": ["-c", "exit 3"]}))
            .await
            .unwrap();
        assert!(matches!(result.status, visor_types::CheckStatus::Failure));
    }

    #[tokio::test]
    async fn json_parse_failure_is_a_warning_not_a_failure() {
        let provider = CommandProvider;
        let ctx = test_ctx().await;
        let result = provider
            .execute(
                &ctx,
                &json!({"command": "echo", "args": ["not-json"], "output_format": "json"}),
            )
            .await
            .unwrap();
        assert!(matches!(result.status, visor_types::CheckStatus::Success));
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].severity, visor_types::Severity::Warning);
    }

    #[tokio::test]
    async fn script_runs_multiline_body_through_interpreter() {
        let provider = ScriptProvider;
        let ctx = test_ctx().await;
        let result = provider
            .execute(
                &ctx,
                &json!({"script": "echo one\necho two"}),
            )
            .await
            .unwrap();
        assert_eq!(result.output, json!("one\ntwo"));
    }
}
