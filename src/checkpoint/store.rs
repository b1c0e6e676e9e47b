//! Document store behind the checkpoint manager.
//!
//! Documents are JSON values addressed by `(collection, key)`. Last writer
//! wins per key. Two implementations: [`MemoryStore`] for tests and embedded
//! use, [`FileStore`] for durable state that survives a process restart.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::util::blocking;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replace the document at `key`.
    async fn set(&self, collection: &str, key: &str, value: Value) -> Result<()>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Shallow-merge an object into the document at `key`, creating it if
    /// absent. A non-object value replaces the document.
    async fn merge(&self, collection: &str, key: &str, value: Value) -> Result<()>;

    /// Every `(key, document)` pair in a collection, ordered by key.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>>;
}

fn merge_value(existing: Option<Value>, patch: Value) -> Value {
    match (existing, patch) {
        (Some(Value::Object(mut base)), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}

/// In-process store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn set(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn merge(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        let merged = merge_value(docs.remove(key), value);
        docs.insert(key.to_string(), merged);
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

/// One pretty-printed JSON file per document under
/// `<root>/<collection>/<key>.json`.
///
/// Writes go to a temp file that is renamed over the target; the previous
/// version is kept as `<key>.json.bak`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, collection: &str, key: &str) -> Result<PathBuf> {
        for part in [collection, key] {
            if part.is_empty()
                || part.contains(['/', '\\'])
                || part.starts_with('.')
            {
                return Err(Error::Store(format!("invalid document name: {:?}", part)));
            }
        }
        Ok(self.root.join(collection).join(format!("{}.json", key)))
    }
}

fn read_doc(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&contents)?))
}

fn write_doc(path: &Path, value: &Value) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            tracing::debug!(dir = %dir.display(), "creating store directory");
            fs::create_dir_all(dir)?;
        }
    }

    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        fs::copy(path, &backup_path)?;
    }

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, serde_json::to_string_pretty(value)?)?;
    fs::rename(&temp_path, path)?;
    tracing::debug!(path = %path.display(), "document saved");
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn set(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        let path = self.doc_path(collection, key)?;
        blocking(move || write_doc(&path, &value)).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let path = self.doc_path(collection, key)?;
        blocking(move || read_doc(&path)).await
    }

    async fn merge(&self, collection: &str, key: &str, value: Value) -> Result<()> {
        let path = self.doc_path(collection, key)?;
        blocking(move || {
            let merged = merge_value(read_doc(&path)?, value);
            write_doc(&path, &merged)
        })
        .await
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let dir = self.root.join(collection);
        blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }
            let mut docs = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if let Some(value) = read_doc(&path)? {
                    docs.push((key.to_string(), value));
                }
            }
            docs.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(docs)
        })
        .await
    }
}
