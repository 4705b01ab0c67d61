use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backend::{Backend, FileFormat};
use crate::DEFAULT_NAMESPACE;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to read memory file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write memory file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed memory file {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

type Namespaces = HashMap<String, HashMap<String, Value>>;

pub type MemoryHandle = Arc<MemoryStore>;

pub struct MemoryStore {
    data: Mutex<Namespaces>,
    backend: Backend,
}

impl MemoryStore {
    pub async fn new(backend: Backend) -> Result<MemoryHandle, MemoryError> {
        let data = match &backend {
            Backend::InMemory => Namespaces::new(),
            Backend::File { path, format } => load_file(path, *format).await?,
        };
        Ok(Arc::new(Self {
            data: Mutex::new(data),
            backend,
        }))
    }

    pub async fn get(&self, key: &str, ns: Option<&str>) -> Option<Value> {
        let guard = self.data.lock().await;
        guard.get(ns(ns)).and_then(|bucket| bucket.get(key)).cloned()
    }

    pub async fn has(&self, key: &str, ns: Option<&str>) -> bool {
        let guard = self.data.lock().await;
        guard
            .get(ns(ns))
            .map(|bucket| bucket.contains_key(key))
            .unwrap_or(false)
    }

    pub async fn set(&self, key: &str, value: Value, ns: Option<&str>) -> Result<(), MemoryError> {
        let mut guard = self.data.lock().await;
        guard
            .entry(ns(ns).to_string())
            .or_default()
            .insert(key.to_string(), value);
        drop(guard);
        self.persist().await
    }

    /// Array-ify: absent key becomes `[value]`; an existing non-array value
    /// is wrapped into a two-element array before the push; an existing
    /// array has `value` pushed onto it.
    pub async fn append(
        &self,
        key: &str,
        value: Value,
        ns: Option<&str>,
    ) -> Result<Value, MemoryError> {
        let mut guard = self.data.lock().await;
        let bucket = guard.entry(ns(ns).to_string()).or_default();
        let next = match bucket.remove(key) {
            Some(Value::Array(mut arr)) => {
                arr.push(value);
                Value::Array(arr)
            }
            Some(existing) => Value::Array(vec![existing, value]),
            None => Value::Array(vec![value]),
        };
        bucket.insert(key.to_string(), next.clone());
        drop(guard);
        self.persist().await?;
        Ok(next)
    }

    pub async fn increment(
        &self,
        key: &str,
        amount: f64,
        ns: Option<&str>,
    ) -> Result<f64, MemoryError> {
        let mut guard = self.data.lock().await;
        let bucket = guard.entry(ns(ns).to_string()).or_default();
        let current = bucket
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let next = current + amount;
        bucket.insert(key.to_string(), serde_json::json!(next));
        drop(guard);
        self.persist().await?;
        Ok(next)
    }

    pub async fn delete(&self, key: &str, ns: Option<&str>) -> Result<bool, MemoryError> {
        let mut guard = self.data.lock().await;
        let removed = guard
            .get_mut(ns(ns))
            .map(|bucket| bucket.remove(key).is_some())
            .unwrap_or(false);
        drop(guard);
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    pub async fn clear(&self, ns: Option<&str>) -> Result<(), MemoryError> {
        let mut guard = self.data.lock().await;
        guard.remove(ns(ns));
        drop(guard);
        self.persist().await
    }

    pub async fn list(&self, ns: Option<&str>) -> Vec<String> {
        let guard = self.data.lock().await;
        guard
            .get(ns(ns))
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get_all(&self, ns: Option<&str>) -> HashMap<String, Value> {
        let guard = self.data.lock().await;
        guard.get(ns(ns)).cloned().unwrap_or_default()
    }

    async fn persist(&self) -> Result<(), MemoryError> {
        let Backend::File { path, format } = &self.backend else {
            return Ok(());
        };
        let snapshot = self.data.lock().await.clone();
        save_file(path, *format, &snapshot).await
    }
}

fn ns(ns: Option<&str>) -> &str {
    ns.unwrap_or(DEFAULT_NAMESPACE)
}

async fn load_file(
    path: &std::path::Path,
    format: FileFormat,
) -> Result<Namespaces, MemoryError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(Namespaces::new());
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| MemoryError::Read {
            path: path.display().to_string(),
            source,
        })?;
    if raw.trim().is_empty() {
        return Ok(Namespaces::new());
    }
    match format {
        FileFormat::Json => serde_json::from_str(&raw).map_err(|e| MemoryError::Decode {
            path: path.display().to_string(),
            source: e.into(),
        }),
        FileFormat::Csv => decode_csv(&raw).map_err(|e| MemoryError::Decode {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

async fn save_file(
    path: &std::path::Path,
    format: FileFormat,
    data: &Namespaces,
) -> Result<(), MemoryError> {
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let encoded = match format {
        FileFormat::Json => {
            serde_json::to_string_pretty(data).map_err(|e| MemoryError::Decode {
                path: path.display().to_string(),
                source: e.into(),
            })?
        }
        FileFormat::Csv => encode_csv(data).map_err(|e| MemoryError::Decode {
            path: path.display().to_string(),
            source: e,
        })?,
    };
    tokio::fs::write(path, encoded)
        .await
        .map_err(|source| MemoryError::Write {
            path: path.display().to_string(),
            source,
        })
}

fn decode_csv(raw: &str) -> Result<Namespaces, anyhow::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(raw.as_bytes());
    let mut out = Namespaces::new();
    for record in reader.records() {
        let record = record?;
        let namespace = record.get(0).unwrap_or(DEFAULT_NAMESPACE).to_string();
        let key = record.get(1).unwrap_or_default().to_string();
        let value_json = record.get(2).unwrap_or("null");
        let value: Value = serde_json::from_str(value_json).unwrap_or(Value::Null);
        out.entry(namespace).or_default().insert(key, value);
    }
    Ok(out)
}

fn encode_csv(data: &Namespaces) -> Result<String, anyhow::Error> {
    let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(vec![]);
    writer.write_record(["namespace", "key", "value"])?;
    for (namespace, bucket) in data {
        for (key, value) in bucket {
            let value_json = serde_json::to_string(value)?;
            writer.write_record([namespace.as_str(), key.as_str(), value_json.as_str()])?;
        }
    }
    writer.flush()?;
    Ok(String::from_utf8(writer.into_inner()?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips_in_same_scope() {
        let store = MemoryStore::new(Backend::InMemory).await.unwrap();
        store.set("k", json!("v"), None).await.unwrap();
        assert_eq!(store.get("k", None).await, Some(json!("v")));
    }

    #[tokio::test]
    async fn increment_from_absent_key_returns_amount_then_running_sum() {
        let store = MemoryStore::new(Backend::InMemory).await.unwrap();
        let first = store.increment("counter", 3.0, None).await.unwrap();
        assert_eq!(first, 3.0);
        let second = store.increment("counter", 3.0, None).await.unwrap();
        assert_eq!(second, 6.0);
    }

    #[tokio::test]
    async fn append_arrayifies_scalars_and_pushes_onto_arrays() {
        let store = MemoryStore::new(Backend::InMemory).await.unwrap();
        store.append("list", json!("a"), None).await.unwrap();
        let after_two = store.append("list", json!("b"), None).await.unwrap();
        assert_eq!(after_two, json!(["a", "b"]));
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = MemoryStore::new(Backend::InMemory).await.unwrap();
        store.set("k", json!(1), Some("ns-a")).await.unwrap();
        store.set("k", json!(2), Some("ns-b")).await.unwrap();
        assert_eq!(store.get("k", Some("ns-a")).await, Some(json!(1)));
        assert_eq!(store.get("k", Some("ns-b")).await, Some(json!(2)));
    }

    #[tokio::test]
    async fn file_backend_json_auto_saves_and_auto_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        {
            let store = MemoryStore::new(Backend::File {
                path: path.clone(),
                format: FileFormat::Json,
            })
            .await
            .unwrap();
            store.set("k", json!({"nested": true}), None).await.unwrap();
        }
        let reloaded = MemoryStore::new(Backend::File {
            path,
            format: FileFormat::Json,
        })
        .await
        .unwrap();
        assert_eq!(reloaded.get("k", None).await, Some(json!({"nested": true})));
    }

    #[tokio::test]
    async fn file_backend_csv_round_trips_through_json_encoded_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.csv");
        {
            let store = MemoryStore::new(Backend::File {
                path: path.clone(),
                format: FileFormat::Csv,
            })
            .await
            .unwrap();
            store.set("count", json!(5), None).await.unwrap();
        }
        let reloaded = MemoryStore::new(Backend::File {
            path,
            format: FileFormat::Csv,
        })
        .await
        .unwrap();
        assert_eq!(reloaded.get("count", None).await, Some(json!(5)));
    }

    #[tokio::test]
    async fn delete_and_clear_remove_keys() {
        let store = MemoryStore::new(Backend::InMemory).await.unwrap();
        store.set("k", json!(1), None).await.unwrap();
        assert!(store.delete("k", None).await.unwrap());
        assert!(!store.has("k", None).await);

        store.set("a", json!(1), Some("ns")).await.unwrap();
        store.set("b", json!(2), Some("ns")).await.unwrap();
        store.clear(Some("ns")).await.unwrap();
        assert!(store.list(Some("ns")).await.is_empty());
    }
}
