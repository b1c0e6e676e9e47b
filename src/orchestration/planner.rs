//! Planning: the planner collaborator and the deterministic fallback plan.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{Plan, PlanDraft, Task, TaskId};
use crate::error::{CollaboratorError, Result};

/// Number of tasks in the fallback plan.
pub const FALLBACK_TASK_COUNT: usize = 3;

const MAX_KEYWORDS: usize = 3;
const DEFAULT_KEYWORDS: [&str; 2] = ["disease", "gene"];

/// Turns a research goal into raw plan text (JSON, optionally fenced).
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, goal: &str) -> std::result::Result<String, CollaboratorError>;
}

/// Sources used by the fallback plan, one per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackSources {
    #[serde(default = "default_gene_disease")]
    pub gene_disease: String,
    #[serde(default = "default_clinical_evidence")]
    pub clinical_evidence: String,
    #[serde(default = "default_researchers")]
    pub researchers: String,
}

fn default_gene_disease() -> String {
    "clingen".to_string()
}

fn default_clinical_evidence() -> String {
    "civic".to_string()
}

fn default_researchers() -> String {
    "openalex".to_string()
}

impl Default for FallbackSources {
    fn default() -> Self {
        Self {
            gene_disease: default_gene_disease(),
            clinical_evidence: default_clinical_evidence(),
            researchers: default_researchers(),
        }
    }
}

/// Where a session's plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    Planner,
    Fallback,
}

/// Up to three goal words longer than three characters and purely
/// alphabetic. Falls back to `["disease", "gene"]`.
pub fn extract_keywords(goal: &str) -> Vec<String> {
    let keywords: Vec<String> = goal
        .split_whitespace()
        .filter(|w| w.chars().count() > 3 && w.chars().all(char::is_alphabetic))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect();

    if keywords.is_empty() {
        DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
    } else {
        keywords
    }
}

/// Three-stage linear plan used whenever planning fails: gene-disease links,
/// then clinical evidence, then researchers. Review is forced after the
/// second stage.
pub fn fallback_plan(goal: &str, sources: &FallbackSources) -> Result<Plan> {
    let entities: Value = json!(extract_keywords(goal));
    let tasks = vec![
        Task::new(
            "task_1",
            "Search for gene-disease associations",
            &sources.gene_disease,
        )
        .with_parameter("query_type", json!("gene_disease"))
        .with_parameter("entities", entities.clone()),
        Task::new(
            "task_2",
            "Search for clinical evidence",
            &sources.clinical_evidence,
        )
        .with_parameter("query_type", json!("gene_disease"))
        .with_parameter("entities", entities.clone())
        .with_dependencies(["task_1"]),
        Task::new(
            "task_3",
            "Find active researchers in the field",
            &sources.researchers,
        )
        .with_parameter("query_type", json!("researcher"))
        .with_parameter("entities", entities)
        .with_dependencies(["task_2"]),
    ];
    Plan::new(goal, tasks, Some(TaskId::new("task_2")))
}

/// Ask the planner for a plan. Any planner error, unparseable output or
/// validation failure (cycles included) yields the fallback plan.
pub async fn plan_or_fallback(
    planner: Option<&dyn Planner>,
    goal: &str,
    sources: &FallbackSources,
) -> Result<(Plan, PlanOrigin)> {
    let Some(planner) = planner else {
        tracing::info!("no planner configured, using fallback plan");
        return Ok((fallback_plan(goal, sources)?, PlanOrigin::Fallback));
    };

    let text = match planner.plan(goal).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "planner failed, using fallback plan");
            return Ok((fallback_plan(goal, sources)?, PlanOrigin::Fallback));
        }
    };

    match PlanDraft::parse(&text).and_then(|draft| draft.into_plan(goal)) {
        Ok(plan) if !plan.is_empty() => {
            tracing::info!(tasks = plan.len(), "plan accepted");
            Ok((plan, PlanOrigin::Planner))
        }
        Ok(_) => {
            tracing::warn!("planner returned no tasks, using fallback plan");
            Ok((fallback_plan(goal, sources)?, PlanOrigin::Fallback))
        }
        Err(e) => {
            tracing::warn!(error = %e, "planner output rejected, using fallback plan");
            Ok((fallback_plan(goal, sources)?, PlanOrigin::Fallback))
        }
    }
}
