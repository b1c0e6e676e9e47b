//! Research plan: a validated DAG of tasks.
//!
//! Tasks live in a plain vector (insertion order is the scheduling
//! tie-break). Dependency edges are checked once, at construction, by
//! building a petgraph graph and refusing duplicates, dangling references
//! and cycles. A `Plan` value that exists is therefore acyclic.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::task::{Parameters, Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::resolver;
use crate::util::strip_code_fence;

/// A DAG of tasks produced for one research goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPlan")]
pub struct Plan {
    goal: String,
    tasks: Vec<Task>,
    checkpoint_after: Option<TaskId>,
}

/// Unvalidated serialized form; every deserialized plan goes through
/// [`Plan::new`].
#[derive(Deserialize)]
struct RawPlan {
    goal: String,
    tasks: Vec<Task>,
    #[serde(default)]
    checkpoint_after: Option<TaskId>,
}

impl TryFrom<RawPlan> for Plan {
    type Error = Error;

    fn try_from(raw: RawPlan) -> Result<Self> {
        Plan::new(raw.goal, raw.tasks, raw.checkpoint_after)
    }
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.ready + self.running + self.completed + self.failed + self.skipped
    }
}

impl Plan {
    /// Validate and build a plan.
    ///
    /// # Errors
    /// - `DuplicateTask` if two tasks share an id
    /// - `UnknownDependency` if a task depends on an id not in the plan
    /// - `UnknownCheckpointTask` if `checkpoint_after` names no task
    /// - `CyclicPlan` if the dependency edges contain a cycle
    pub fn new(
        goal: impl Into<String>,
        tasks: Vec<Task>,
        checkpoint_after: Option<TaskId>,
    ) -> Result<Self> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut index: HashMap<&TaskId, NodeIndex> = HashMap::new();

        for (pos, task) in tasks.iter().enumerate() {
            if index.contains_key(&task.id) {
                return Err(Error::DuplicateTask(task.id.to_string()));
            }
            index.insert(&task.id, graph.add_node(pos));
        }

        for task in &tasks {
            let to = index[&task.id];
            for dep in &task.depends_on {
                let from = index.get(dep).ok_or_else(|| Error::UnknownDependency {
                    task: task.id.to_string(),
                    dependency: dep.to_string(),
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let pos = graph[cycle.node_id()];
            return Err(Error::CyclicPlan {
                task: tasks[pos].id.to_string(),
            });
        }

        if let Some(id) = &checkpoint_after {
            if !index.contains_key(id) {
                return Err(Error::UnknownCheckpointTask(id.to_string()));
            }
        }

        Ok(Self {
            goal: goal.into(),
            tasks,
            checkpoint_after,
        })
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Mutable access to individual tasks. The vector itself is not exposed,
    /// so the validated shape (ids, edges) cannot change after construction.
    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    pub fn checkpoint_after(&self) -> Option<&TaskId> {
        self.checkpoint_after.as_ref()
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| &t.id == id)
    }

    /// Replace a task with an updated copy carrying the same id.
    pub fn replace_task(&mut self, updated: Task) -> Result<()> {
        let slot = self
            .task_mut(&updated.id)
            .ok_or_else(|| Error::TaskNotFound(updated.id.to_string()))?;
        if slot.depends_on != updated.depends_on {
            return Err(Error::InvalidTaskTransition {
                task: updated.id.to_string(),
                from: "validated dependencies".to_string(),
                to: "changed dependencies".to_string(),
            });
        }
        *slot = updated;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks ordered so that each comes after all of its dependencies.
    /// Ties keep insertion order.
    pub fn topological_order(&self) -> Vec<&Task> {
        let mut placed: HashSet<&TaskId> = HashSet::new();
        let mut order = Vec::with_capacity(self.tasks.len());
        while order.len() < self.tasks.len() {
            let next = self.tasks.iter().find(|t| {
                !placed.contains(&t.id) && t.depends_on.iter().all(|d| placed.contains(d))
            });
            match next {
                Some(task) => {
                    placed.insert(&task.id);
                    order.push(task);
                }
                // Unreachable for a validated plan.
                None => break,
            }
        }
        order
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Ready => counts.ready += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// Nothing is eligible and nothing is in flight.
    pub fn is_exhausted(&self) -> bool {
        resolver::is_exhausted(&self.tasks)
    }

    /// Distinct sources of tasks that have not started, in plan order.
    pub fn open_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for task in self.tasks.iter().filter(|t| t.is_open()) {
            if !sources.contains(&task.source) {
                sources.push(task.source.clone());
            }
        }
        sources
    }
}

/// Loosely typed planner output.
///
/// Accepts the field names research planners tend to emit (`task_id`,
/// `data_source`, `sub_tasks`, `hitl_checkpoint_after`) as well as the
/// crate's own names. Conversion into a [`Plan`] runs full validation.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanDraft {
    #[serde(default, alias = "research_goal")]
    pub goal: Option<String>,
    #[serde(alias = "sub_tasks")]
    pub tasks: Vec<TaskDraft>,
    #[serde(default, alias = "hitl_checkpoint_after")]
    pub checkpoint_after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    #[serde(alias = "task_id")]
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "data_source")]
    pub source: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub entities: Option<Vec<String>>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl PlanDraft {
    /// Parse raw planner text. Tolerates a fenced ```json block around the
    /// payload.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(strip_code_fence(text))?)
    }

    /// Validate into a [`Plan`]. `fallback_goal` is used when the draft
    /// carries no goal of its own.
    pub fn into_plan(self, fallback_goal: &str) -> Result<Plan> {
        let goal = self
            .goal
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| fallback_goal.to_string());

        let tasks = self
            .tasks
            .into_iter()
            .map(|draft| {
                let mut parameters = draft.parameters;
                if let Some(query_type) = draft.query_type {
                    parameters.insert("query_type".to_string(), Value::String(query_type));
                }
                if let Some(entities) = draft.entities {
                    parameters.insert(
                        "entities".to_string(),
                        Value::Array(entities.into_iter().map(Value::String).collect()),
                    );
                }
                let mut task = Task::new(draft.id, &draft.description, &draft.source)
                    .with_dependencies(draft.depends_on);
                task.parameters = parameters;
                task
            })
            .collect();

        Plan::new(goal, tasks, self.checkpoint_after.map(TaskId::from))
    }
}
