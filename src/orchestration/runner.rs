//! Task runner: executes one Ready task against its retrieval collaborator.
//!
//! The runner never retries and never returns a collaborator failure as an
//! error. Whatever the collaborator does, the task comes back Completed or
//! Failed; only an illegal status move is an `Err`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Findings, Parameters, Task};
use crate::error::{CollaboratorError, Result};

/// What a retrieval collaborator hands back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RetrievalOutcome {
    pub fn ok(data: Vec<Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Read-only view handed to a retriever along with the task parameters.
/// Lets a source enrich its query with results gathered earlier.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalContext<'a> {
    pub goal: &'a str,
    pub findings: &'a Findings,
}

/// A data source the orchestrator can query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        parameters: &Parameters,
        ctx: &RetrievalContext<'_>,
    ) -> std::result::Result<RetrievalOutcome, CollaboratorError>;
}

/// Retrievers keyed by the `source` name tasks carry.
#[derive(Clone, Default)]
pub struct RetrieverRegistry {
    retrievers: HashMap<String, Arc<dyn Retriever>>,
}

impl RetrieverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: &str, retriever: Arc<dyn Retriever>) {
        self.retrievers.insert(source.to_string(), retriever);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, source: &str, retriever: Arc<dyn Retriever>) -> Self {
        self.register(source, retriever);
        self
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn Retriever>> {
        self.retrievers.get(source).cloned()
    }

    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = self.retrievers.keys().map(String::as_str).collect();
        sources.sort_unstable();
        sources
    }
}

impl std::fmt::Debug for RetrieverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrieverRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

/// Parameters a task runs with: its own, overlaid with the session scope.
pub fn effective_parameters(task: &Task, scope: &Parameters) -> Parameters {
    let mut merged = task.parameters.clone();
    for (key, value) in scope {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[derive(Debug, Clone)]
pub struct TaskRunner {
    registry: Arc<RetrieverRegistry>,
}

impl TaskRunner {
    pub fn new(registry: Arc<RetrieverRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RetrieverRegistry {
        &self.registry
    }

    /// Run a Ready task and return the updated copy.
    ///
    /// # Errors
    /// `InvalidTaskTransition` if the task is not Ready.
    pub async fn run(
        &self,
        mut task: Task,
        scope: &Parameters,
        ctx: &RetrievalContext<'_>,
    ) -> Result<Task> {
        task.start()?;
        tracing::info!(task = %task.id, source = %task.source, "task started");

        let Some(retriever) = self.registry.get(&task.source) else {
            let msg = format!("no retriever registered for source '{}'", task.source);
            tracing::warn!(task = %task.id, "{}", msg);
            task.fail(&msg)?;
            return Ok(task);
        };

        let parameters = effective_parameters(&task, scope);
        match retriever.search(&parameters, ctx).await {
            Ok(outcome) if outcome.success => {
                let count = outcome.data.len();
                task.complete(Value::Array(outcome.data))?;
                tracing::info!(task = %task.id, records = count, "task completed");
            }
            Ok(outcome) => {
                let msg = outcome
                    .error
                    .unwrap_or_else(|| "retrieval reported failure".to_string());
                tracing::warn!(task = %task.id, error = %msg, "task failed");
                task.fail(&msg)?;
            }
            Err(e) => {
                tracing::warn!(task = %task.id, error = %e, "task failed");
                task.fail(&e.to_string())?;
            }
        }
        Ok(task)
    }
}
