//! Task data model for the research plan.
//!
//! A task is one unit of retrieval work: a data source to query, the
//! parameters to hand it, and the tasks whose results must exist first.
//! Status changes only move forward; see [`TaskStatus::can_transition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Ordered parameter map passed verbatim to a retrieval collaborator.
pub type Parameters = serde_json::Map<String, Value>;

/// Identifier of a task, unique within a plan.
///
/// Planner output names tasks with short strings (`task_1`, `t2`), so this is
/// a string newtype rather than a generated UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting on dependencies or on the scheduler.
    #[default]
    Pending,
    /// Selected by the scheduler, about to run.
    Ready,
    /// Handed to the retrieval collaborator.
    Running,
    /// Collaborator returned data.
    Completed,
    /// Collaborator reported a failure.
    Failed,
    /// Removed from the plan by an explicit directive.
    Skipped,
}

impl TaskStatus {
    /// Legal forward moves. Nothing ever moves backward, and `Skipped` is only
    /// reachable before a task starts running.
    pub fn can_transition(self, target: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, target),
            (Pending, Ready)
                | (Ready, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Pending, Skipped)
                | (Ready, Skipped)
        )
    }

    /// Completed, Failed and Skipped accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Rank along Pending < Ready < Running < {Completed, Failed}.
    /// `Skipped` has no rank of its own; it sits outside the run path.
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Ready => 1,
            TaskStatus::Running => 2,
            TaskStatus::Completed | TaskStatus::Failed => 3,
            TaskStatus::Skipped => 3,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A single retrieval task in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier within the plan.
    pub id: TaskId,
    /// Human-readable description, opaque to the orchestrator.
    pub description: String,
    /// Name of the retrieval collaborator that serves this task.
    pub source: String,
    /// Parameters handed to the collaborator.
    #[serde(default)]
    pub parameters: Parameters,
    /// Tasks that must be Completed before this one is eligible.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Payload set when the task completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message set when the task fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the runner picked the task up.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task completed or failed.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a Pending task with no parameters and no dependencies.
    pub fn new(id: impl Into<TaskId>, description: &str, source: &str) -> Self {
        Self {
            id: id.into(),
            description: description.to_string(),
            source: source.to_string(),
            parameters: Parameters::new(),
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Builder: add dependencies. Duplicates are dropped, first occurrence wins.
    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    /// Builder: set a single parameter.
    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Move to `target`, rejecting anything outside the forward order.
    pub fn transition(&mut self, target: TaskStatus) -> Result<()> {
        if !self.status.can_transition(target) {
            return Err(Error::InvalidTaskTransition {
                task: self.id.to_string(),
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Pending -> Ready.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.transition(TaskStatus::Ready)
    }

    /// Ready -> Running, recording the start time.
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Completed with the collaborator payload.
    pub fn complete(&mut self, result: Value) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed with an error message.
    pub fn fail(&mut self, error: &str) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Pending/Ready -> Skipped. Only ever called on an explicit directive.
    pub fn skip(&mut self) -> Result<()> {
        self.transition(TaskStatus::Skipped)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the task has not started yet and could still run or be skipped.
    pub fn is_open(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Ready)
    }
}
