//! Accumulated findings of a session.
//!
//! One entry per Completed task, keyed by task id. Entries are written once
//! and never changed; there is no update or remove API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::task::TaskId;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Findings {
    entries: BTreeMap<TaskId, Value>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the result of a completed task.
    ///
    /// # Errors
    /// Returns `FindingExists` if the task already has an entry.
    pub fn record(&mut self, task_id: TaskId, result: Value) -> Result<()> {
        if self.entries.contains_key(&task_id) {
            return Err(Error::FindingExists(task_id.to_string()));
        }
        self.entries.insert(task_id, result);
        Ok(())
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&Value> {
        self.entries.get(task_id)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.entries.contains_key(task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TaskId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records held for a task: array length, object size, 0 for
    /// null, 1 for any other scalar.
    pub fn record_count(&self, task_id: &TaskId) -> usize {
        self.entries.get(task_id).map(record_count).unwrap_or(0)
    }
}

/// Record count of an opaque result value.
pub fn record_count(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(s) if s.is_empty() => 0,
        _ => 1,
    }
}

/// Whether a result carries no records at all.
pub fn is_empty_result(value: &Value) -> bool {
    record_count(value) == 0
}
