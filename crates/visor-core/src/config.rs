//! Layered config load (§6, [AMBIENT]). Mirrors the teacher's `ConfigStore`:
//! a file layer (YAML, parsed then merged as `serde_json::Value`), an
//! `extends` chain (local paths or HTTPS URLs, child overrides parent,
//! remote disabled by `VISOR_NO_REMOTE_EXTENDS`), an environment layer, and a
//! runtime/CLI override layer on top — all reduced with the same
//! `deep_merge` the teacher's `ConfigStore` uses for its provider/global/
//! project/env/runtime/cli layers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use visor_types::{BackoffConfig, Criticality, EventType, FailIfSpec, RetryConfig, RoutingBlock, StepConfig};

use crate::error::ConfigError;

pub const DEFAULT_MAX_PARALLELISM: usize = 3;
pub const DEFAULT_MAX_LOOPS: u32 = 25;
pub const DEFAULT_SNAPSHOT_RETENTION: usize = 3;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TagFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl TagFilter {
    /// ANY-match `include`, ANY-match `exclude`; exclude wins (§4.1 step 2).
    pub fn admits(&self, tags: &[String]) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|t| tags.contains(t));
        let excluded = self.exclude.iter().any(|t| tags.contains(t));
        included && !excluded
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RoutingDefaults {
    #[serde(default)]
    pub on_fail: Option<RoutingBlock>,
    #[serde(default)]
    pub max_loops: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub base_path: Option<String>,
    #[serde(default)]
    pub cleanup_on_exit: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExtendsSpec {
    One(String),
    Many(Vec<String>),
}

impl ExtendsSpec {
    fn entries(&self) -> Vec<String> {
        match self {
            ExtendsSpec::One(s) => vec![s.clone()],
            ExtendsSpec::Many(v) => v.clone(),
        }
    }
}

/// A step as it appears under `steps`/`checks` in YAML — identical to
/// `StepConfig` but without `name`, which is supplied by the map key.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawStep {
    #[serde(rename = "type")]
    pub check_type: String,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub on: Vec<EventType>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, rename = "if")]
    pub if_expr: Option<String>,
    #[serde(default)]
    pub fail_if: Option<FailIfSpec>,
    #[serde(default)]
    pub assume: Vec<String>,
    #[serde(default)]
    pub guarantee: Vec<String>,
    #[serde(default, rename = "forEach")]
    pub for_each: bool,
    #[serde(default)]
    pub fanout: Option<visor_types::Fanout>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub criticality: Option<visor_types::Criticality>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default)]
    pub max_runs: Option<u32>,
    #[serde(default)]
    pub reuse_ai_session: Option<String>,
    #[serde(default)]
    pub session_mode: Option<visor_types::SessionMode>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub schema: Option<visor_types::SchemaRef>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub on_init: Option<RoutingBlock>,
    #[serde(default)]
    pub on_success: Option<RoutingBlock>,
    #[serde(default)]
    pub on_fail: Option<RoutingBlock>,
    #[serde(default)]
    pub on_finish: Option<RoutingBlock>,
}

impl RawStep {
    /// Folds `routing.defaults.on_fail` underneath the step's own `on_fail`
    /// and stamps the map key on as `name` (§4.1 step 7). `criticality`
    /// fills in a default retry count when the step (after the merge above)
    /// still declares none at all — external calls get the most slack since
    /// they're the likeliest to be flaky, internal ones less.
    fn into_step_config(self, name: String, defaults: &RoutingDefaults) -> StepConfig {
        let mut on_fail = merge_on_fail(self.on_fail, defaults.on_fail.clone());
        if let Some(retry) = default_retry_for_criticality(self.criticality) {
            match &mut on_fail {
                Some(block) if block.retry.is_none() => block.retry = Some(retry),
                None => {
                    on_fail = Some(RoutingBlock {
                        retry: Some(retry),
                        ..RoutingBlock::default()
                    })
                }
                Some(_) => {}
            }
        }
        StepConfig {
            name,
            check_type: self.check_type,
            options: self.options,
            on: self.on,
            triggers: self.triggers,
            depends_on: self.depends_on,
            if_expr: self.if_expr,
            fail_if: self.fail_if,
            assume: self.assume,
            guarantee: self.guarantee,
            for_each: self.for_each,
            fanout: self.fanout,
            tags: self.tags,
            criticality: self.criticality,
            group: self.group,
            continue_on_failure: self.continue_on_failure,
            max_runs: self.max_runs,
            reuse_ai_session: self.reuse_ai_session,
            session_mode: self.session_mode,
            timeout: self.timeout,
            schema: self.schema,
            template: self.template,
            on_init: self.on_init,
            on_success: self.on_success,
            on_fail,
            on_finish: self.on_finish,
        }
    }
}

/// A step's own `on_fail` always wins; the default only fills in fields the
/// step left unset (transitions/goto default to the step's own, run/retry
/// default too when the step declared none at all).
fn merge_on_fail(own: Option<RoutingBlock>, default: Option<RoutingBlock>) -> Option<RoutingBlock> {
    match (own, default) {
        (Some(own), _) => Some(own),
        (None, default) => default,
    }
}

/// External calls (network/third-party) get 2 retries by default, internal
/// ones get 1; `policy`/`info` steps are assertions over already-settled
/// state and retrying them wouldn't change their outcome, so they stay at
/// the provider's own no-retry default (§4.1 step 7).
fn default_retry_for_criticality(criticality: Option<Criticality>) -> Option<RetryConfig> {
    let max = match criticality? {
        Criticality::External => 2,
        Criticality::Internal => 1,
        Criticality::Policy | Criticality::Info => return None,
    };
    Some(RetryConfig {
        max,
        backoff: BackoffConfig::default(),
    })
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VisorConfig {
    pub version: String,
    #[serde(default)]
    pub steps: Option<HashMap<String, RawStep>>,
    #[serde(default)]
    pub checks: Option<HashMap<String, RawStep>>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub max_parallelism: Option<usize>,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub fail_if: Option<FailIfSpec>,
    #[serde(default)]
    pub tag_filter: TagFilter,
    #[serde(default)]
    pub routing: RoutingDefaults,
    #[serde(default)]
    pub limits: Value,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub extends: Option<ExtendsSpec>,
}

impl VisorConfig {
    /// `steps` wins when both `steps` and `checks` are present; the core
    /// normalises to one internal map keyed by step name with `routing
    /// .defaults.on_fail` folded under each step's own `on_fail`.
    pub fn normalized_steps(&self) -> HashMap<String, StepConfig> {
        let raw = self.steps.clone().or_else(|| self.checks.clone()).unwrap_or_default();
        raw.into_iter()
            .map(|(name, step)| (name.clone(), step.into_step_config(name, &self.routing)))
            .collect()
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism.unwrap_or(DEFAULT_MAX_PARALLELISM)
    }

    pub fn max_loops(&self) -> u32 {
        self.routing.max_loops.unwrap_or(DEFAULT_MAX_LOOPS)
    }
}

/// Loads and layers config the way the teacher's `ConfigStore` layers
/// global/project/managed/env/runtime/cli: a file layer (with its `extends`
/// chain resolved and merged underneath it, child overriding parent), an
/// environment layer, and a runtime/CLI override layer applied last.
pub struct ConfigStore {
    path: PathBuf,
    layers: Value,
    runtime: Value,
}

impl ConfigStore {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let file_layer = load_and_resolve_extends(&path).await?;
        let env_layer = env_layer();
        let mut merged = empty_object();
        deep_merge(&mut merged, &file_layer);
        deep_merge(&mut merged, &env_layer);
        Ok(Self {
            path,
            layers: merged,
            runtime: empty_object(),
        })
    }

    /// Applies CLI-flag overrides (e.g. `--max-parallelism`, `--fail-fast`)
    /// on top of the file+env layers. Later calls win over earlier ones.
    pub fn with_runtime_override(mut self, overlay: Value) -> Self {
        deep_merge(&mut self.runtime, &overlay);
        self
    }

    pub fn effective_value(&self) -> Value {
        let mut merged = self.layers.clone();
        deep_merge(&mut merged, &self.runtime);
        merged
    }

    pub fn effective(&self) -> Result<VisorConfig, ConfigError> {
        let value = self.effective_value();
        serde_json::from_value(value).map_err(|source| ConfigError::Shape {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// 16-character hex prefix of the effective config's SHA-256, used as the
    /// `config_hash` stamped on a persisted snapshot (§6).
    pub fn config_hash(&self) -> String {
        let canonical = serde_json::to_string(&self.effective_value()).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        hex_prefix(&digest, 16)
    }

    pub fn source_path(&self) -> &Path {
        &self.path
    }
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(chars);
    out
}

fn empty_object() -> Value {
    json!({})
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

/// `VISOR_*` environment variables that affect core behaviour, lifted into
/// the `workspace`/`routing`/`output`-shaped overlay they correspond to.
fn env_layer() -> Value {
    let mut overlay = empty_object();
    if let Ok(path) = std::env::var("VISOR_WORKSPACE_PATH") {
        overlay["workspace"]["base_path"] = json!(path);
    }
    if let Ok(enabled) = std::env::var("VISOR_WORKSPACE_ENABLED") {
        overlay["workspace"]["enabled"] = json!(parse_bool_env(&enabled));
    }
    overlay
}

fn parse_bool_env(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn remote_extends_disabled() -> bool {
    std::env::var("VISOR_NO_REMOTE_EXTENDS")
        .map(|v| parse_bool_env(&v))
        .unwrap_or(false)
}

/// Loads `path`, resolves its `extends` chain (depth-first, parent first so
/// the child's own values always win), and returns the fully merged
/// `serde_json::Value` — `extends` itself is not carried into the result.
fn load_and_resolve_extends<'a>(
    path: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, ConfigError>> + Send + 'a>> {
    Box::pin(async move {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let mut own: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let extends = own
            .as_object_mut()
            .and_then(|map| map.remove("extends"))
            .and_then(|v| serde_json::from_value::<ExtendsSpec>(v).ok());

        let mut merged = empty_object();
        if let Some(spec) = extends {
            for entry in spec.entries() {
                let parent = load_extends_entry(path, &entry).await?;
                deep_merge(&mut merged, &parent);
            }
        }
        deep_merge(&mut merged, &own);
        Ok(merged)
    })
}

async fn load_extends_entry(including_path: &Path, entry: &str) -> Result<Value, ConfigError> {
    if entry.starts_with("https://") || entry.starts_with("http://") {
        if remote_extends_disabled() {
            return Err(ConfigError::RemoteExtendsDisabled);
        }
        let text = reqwest::get(entry)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| ConfigError::RemoteFetch {
                url: entry.to_string(),
                source,
            })?
            .text()
            .await
            .map_err(|source| ConfigError::RemoteFetch {
                url: entry.to_string(),
                source,
            })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: entry.to_string(),
            source,
        })
    } else {
        let resolved = including_path
            .parent()
            .map(|dir| dir.join(entry))
            .unwrap_or_else(|| PathBuf::from(entry));
        load_and_resolve_extends(&resolved).await
    }
}

/// Persisted config-snapshot history (§6): at most `retention` snapshots,
/// auto-pruned oldest-first, plain JSON file storage like the teacher's
/// `Storage` rather than an embedded SQL engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub id: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub trigger: SnapshotTrigger,
    pub config_hash: String,
    pub config_yaml: String,
    pub source_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    Startup,
    Reload,
}

pub struct ConfigSnapshotStore {
    path: PathBuf,
    retention: usize,
}

impl ConfigSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retention: DEFAULT_SNAPSHOT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    async fn read_all(&self) -> Vec<ConfigSnapshot> {
        let Ok(raw) = tokio::fs::read_to_string(&self.path).await else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    async fn write_all(&self, snapshots: &[ConfigSnapshot]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let encoded = serde_json::to_string_pretty(snapshots).unwrap_or_default();
        tokio::fs::write(&self.path, encoded).await
    }

    /// Appends a snapshot, pruning the oldest entries beyond `retention`.
    pub async fn record(
        &self,
        trigger: SnapshotTrigger,
        config_hash: String,
        config_yaml: String,
        source_path: String,
    ) -> std::io::Result<ConfigSnapshot> {
        let mut snapshots = self.read_all().await;
        let id = snapshots.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        let snapshot = ConfigSnapshot {
            id,
            created_at: chrono::Utc::now(),
            trigger,
            config_hash,
            config_yaml,
            source_path,
        };
        snapshots.push(snapshot.clone());
        snapshots.sort_by_key(|s| s.id);
        if snapshots.len() > self.retention {
            let drop_count = snapshots.len() - self.retention;
            snapshots.drain(0..drop_count);
        }
        self.write_all(&snapshots).await?;
        Ok(snapshot)
    }

    /// Descending by id, per §6.
    pub async fn list(&self) -> Vec<ConfigSnapshot> {
        let mut snapshots = self.read_all().await;
        snapshots.sort_by_key(|s| std::cmp::Reverse(s.id));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn steps_key_wins_over_checks_when_both_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visor.yaml");
        tokio::fs::write(
            &path,
            r#"
version: "1"
steps:
  a:
    type: noop
checks:
  b:
    type: noop
"#,
        )
        .await
        .unwrap();
        let store = ConfigStore::load(&path).await.unwrap();
        let effective = store.effective().unwrap();
        let steps = effective.normalized_steps();
        assert!(steps.contains_key("a"));
        assert!(!steps.contains_key("b"));
    }

    #[tokio::test]
    async fn extends_chain_merges_parent_underneath_child() {
        let dir = tempfile::tempdir().unwrap();
        let parent_path = dir.path().join("base.yaml");
        tokio::fs::write(
            &parent_path,
            r#"
version: "1"
max_parallelism: 2
steps:
  lint:
    type: noop
"#,
        )
        .await
        .unwrap();
        let child_path = dir.path().join("visor.yaml");
        tokio::fs::write(
            &child_path,
            r#"
version: "1"
extends: base.yaml
max_parallelism: 5
steps:
  test:
    type: noop
"#,
        )
        .await
        .unwrap();
        let store = ConfigStore::load(&child_path).await.unwrap();
        let effective = store.effective().unwrap();
        assert_eq!(effective.max_parallelism(), 5);
        let steps = effective.normalized_steps();
        assert!(steps.contains_key("lint"));
        assert!(steps.contains_key("test"));
    }

    #[tokio::test]
    async fn runtime_override_wins_over_file_and_env_layers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visor.yaml");
        tokio::fs::write(&path, "version: \"1\"\nmax_parallelism: 2\n")
            .await
            .unwrap();
        let store = ConfigStore::load(&path)
            .await
            .unwrap()
            .with_runtime_override(json!({"max_parallelism": 9}));
        assert_eq!(store.effective().unwrap().max_parallelism(), 9);
    }

    #[tokio::test]
    async fn snapshot_store_prunes_to_retention_and_lists_descending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigSnapshotStore::new(dir.path().join("snapshots.json")).with_retention(2);
        for i in 0..3 {
            store
                .record(SnapshotTrigger::Startup, format!("hash{i}"), "version: '1'".into(), "visor.yaml".into())
                .await
                .unwrap();
        }
        let listed = store.list().await;
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id > listed[1].id);
    }

    #[test]
    fn tag_filter_exclude_wins_over_include() {
        let filter = TagFilter {
            include: vec!["fast".to_string()],
            exclude: vec!["flaky".to_string()],
        };
        assert!(filter.admits(&["fast".to_string()]));
        assert!(!filter.admits(&["fast".to_string(), "flaky".to_string()]));
    }

    fn raw_step(check_type: &str) -> RawStep {
        RawStep {
            check_type: check_type.to_string(),
            options: Value::Null,
            on: Vec::new(),
            triggers: Vec::new(),
            depends_on: Vec::new(),
            if_expr: None,
            fail_if: None,
            assume: Vec::new(),
            guarantee: Vec::new(),
            for_each: false,
            fanout: None,
            tags: Vec::new(),
            criticality: None,
            group: None,
            continue_on_failure: false,
            max_runs: None,
            reuse_ai_session: None,
            session_mode: None,
            timeout: None,
            schema: None,
            template: None,
            on_init: None,
            on_success: None,
            on_fail: None,
            on_finish: None,
        }
    }

    #[test]
    fn external_criticality_gets_a_default_retry_when_step_declares_none() {
        let mut step = raw_step("http");
        step.criticality = Some(visor_types::Criticality::External);
        let config = step.into_step_config("fetch".to_string(), &RoutingDefaults::default());
        assert_eq!(config.on_fail.unwrap().retry.unwrap().max, 2);
    }

    #[test]
    fn internal_criticality_default_retry_never_overrides_an_explicit_one() {
        let mut step = raw_step("noop");
        step.criticality = Some(visor_types::Criticality::Internal);
        step.on_fail = Some(RoutingBlock {
            retry: Some(visor_types::RetryConfig {
                max: 9,
                backoff: visor_types::BackoffConfig::default(),
            }),
            ..RoutingBlock::default()
        });
        let config = step.into_step_config("build".to_string(), &RoutingDefaults::default());
        assert_eq!(config.on_fail.unwrap().retry.unwrap().max, 9);
    }

    #[test]
    fn policy_criticality_gets_no_default_retry() {
        let mut step = raw_step("noop");
        step.criticality = Some(visor_types::Criticality::Policy);
        let config = step.into_step_config("lint".to_string(), &RoutingDefaults::default());
        assert!(config.on_fail.is_none());
    }
}
