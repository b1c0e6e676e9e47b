//! Consistency gate over accumulated findings.
//!
//! The primary path hands a summary of the findings to an [`Analyzer`] and
//! parses its JSON verdict. When the analyzer fails or answers with something
//! that is not a verdict, a rule-based pass runs instead. [`ConsistencyGate::evaluate`]
//! cannot fail: anything unexpected degrades to "no conflicts, no review".

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::core::{is_empty_result, record_count, Findings, Plan, TaskId, TaskStatus};
use crate::error::{CollaboratorError, Result};
use crate::util::{strip_code_fence, truncate_chars};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Contradiction,
    Missing,
    LowConfidence,
    Outdated,
    #[serde(alias = "quality")]
    QualityFailure,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKind::Contradiction => write!(f, "contradiction"),
            ConflictKind::Missing => write!(f, "missing"),
            ConflictKind::LowConfidence => write!(f, "low_confidence"),
            ConflictKind::Outdated => write!(f, "outdated"),
            ConflictKind::QualityFailure => write!(f, "quality_failure"),
        }
    }
}

/// One issue found in the findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub affected_task_ids: Vec<TaskId>,
    /// Domain entities (genes, diseases) the issue concerns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_entities: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
}

impl Conflict {
    pub fn new(
        kind: ConflictKind,
        description: &str,
        affected_task_ids: Vec<TaskId>,
        recommendation: &str,
    ) -> Self {
        Self {
            kind,
            description: description.to_string(),
            affected_task_ids,
            affected_entities: Vec::new(),
            recommendation: recommendation.to_string(),
        }
    }

    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.affected_entities = entities;
        self
    }

    /// Identity used to recognise a conflict that was already reviewed.
    pub fn fingerprint(&self) -> String {
        let ids: Vec<&str> = self.affected_task_ids.iter().map(TaskId::as_str).collect();
        format!("{}|{}|{}", self.kind, ids.join(","), self.description)
    }
}

/// Which path produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Analysis,
    RuleBased,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub requires_review: bool,
    pub conflicts: Vec<Conflict>,
    pub source: VerdictSource,
}

impl GateVerdict {
    fn clear(source: VerdictSource) -> Self {
        Self {
            requires_review: false,
            conflicts: Vec::new(),
            source,
        }
    }
}

/// Per-task slice of the findings handed to the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryEntry {
    pub task_id: TaskId,
    pub source: String,
    pub record_count: usize,
    /// Pretty JSON of the first records, character-limited.
    pub sample: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingsSummary {
    pub goal: String,
    pub entries: Vec<SummaryEntry>,
    /// `(task, error)` for every Failed task.
    pub failures: Vec<(TaskId, String)>,
}

impl FindingsSummary {
    /// Markdown rendering, one section per completed task.
    pub fn render(&self) -> String {
        let mut out = format!("Research goal: {}\n", self.goal);
        for entry in &self.entries {
            out.push_str(&format!(
                "\n### {} (Source: {})\nTotal records: {}\nSample data:\n```json\n{}\n```\n",
                entry.task_id, entry.source, entry.record_count, entry.sample
            ));
        }
        for (task_id, error) in &self.failures {
            out.push_str(&format!("\n### {} failed\n{}\n", task_id, error));
        }
        out
    }
}

/// Limits applied when summarising findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateLimits {
    #[serde(default = "default_sample_records")]
    pub sample_records: usize,
    #[serde(default = "default_sample_chars")]
    pub sample_chars: usize,
}

fn default_sample_records() -> usize {
    5
}

fn default_sample_chars() -> usize {
    2000
}

impl Default for GateLimits {
    fn default() -> Self {
        Self {
            sample_records: default_sample_records(),
            sample_chars: default_sample_chars(),
        }
    }
}

/// Free-form consistency judgment over a findings summary.
///
/// Expected to answer with JSON of the shape
/// `{"conflicts": [{"type", "description", "affected_task_ids", "recommendation"}],
/// "requires_human_review": bool}`.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        summary: &FindingsSummary,
    ) -> std::result::Result<String, CollaboratorError>;
}

#[derive(Deserialize)]
struct AnalysisReport {
    #[serde(default)]
    conflicts: Vec<Conflict>,
    #[serde(default)]
    requires_human_review: bool,
    #[serde(default)]
    review_reason: Option<String>,
}

#[derive(Clone, Default)]
pub struct ConsistencyGate {
    analyzer: Option<Arc<dyn Analyzer>>,
    limits: GateLimits,
}

impl std::fmt::Debug for ConsistencyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyGate")
            .field("analyzer", &self.analyzer.is_some())
            .field("limits", &self.limits)
            .finish()
    }
}

impl ConsistencyGate {
    pub fn new(analyzer: Option<Arc<dyn Analyzer>>, limits: GateLimits) -> Self {
        Self { analyzer, limits }
    }

    pub async fn evaluate(&self, plan: &Plan, findings: &Findings) -> GateVerdict {
        let has_failures = plan.tasks().iter().any(|t| t.status == TaskStatus::Failed);
        if findings.is_empty() && !has_failures {
            return GateVerdict::clear(VerdictSource::RuleBased);
        }

        let summary = match self.summarize(plan, findings) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "could not summarise findings, skipping gate");
                return GateVerdict::clear(VerdictSource::Degraded);
            }
        };

        let Some(analyzer) = &self.analyzer else {
            return rule_based(plan, findings);
        };

        match analyzer.analyze(&summary).await {
            Ok(text) => match serde_json::from_str::<AnalysisReport>(strip_code_fence(&text)) {
                Ok(report) => {
                    if report.requires_human_review {
                        tracing::info!(
                            conflicts = report.conflicts.len(),
                            reason = report.review_reason.as_deref().unwrap_or(""),
                            "analysis requests review"
                        );
                    }
                    GateVerdict {
                        requires_review: report.requires_human_review,
                        conflicts: report.conflicts,
                        source: VerdictSource::Analysis,
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable analysis, using rule-based gate");
                    rule_based(plan, findings)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "analyzer failed, using rule-based gate");
                rule_based(plan, findings)
            }
        }
    }

    /// Build the summary handed to the analyzer.
    pub fn summarize(&self, plan: &Plan, findings: &Findings) -> Result<FindingsSummary> {
        let mut entries = Vec::new();
        for (task_id, result) in findings.iter() {
            let source = plan
                .task(task_id)
                .map(|t| t.source.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let sample: Vec<&Value> = match result {
                Value::Array(items) => items.iter().take(self.limits.sample_records).collect(),
                other => vec![other],
            };
            let rendered = serde_json::to_string_pretty(&sample)?;
            entries.push(SummaryEntry {
                task_id: task_id.clone(),
                source,
                record_count: record_count(result),
                sample: truncate_chars(&rendered, self.limits.sample_chars).to_string(),
            });
        }

        let failures = plan
            .tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| {
                (
                    t.id.clone(),
                    t.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                )
            })
            .collect();

        Ok(FindingsSummary {
            goal: plan.goal().to_string(),
            entries,
            failures,
        })
    }
}

/// Deterministic checks used when analysis is unavailable.
///
/// - `Missing` for every Completed task with an empty result
/// - `QualityFailure` for every Failed task
/// - `Contradiction` for a gene reported with more than two distinct
///   evidence levels across the findings
pub fn rule_based(plan: &Plan, findings: &Findings) -> GateVerdict {
    let mut conflicts = Vec::new();

    for task in plan.tasks() {
        match task.status {
            TaskStatus::Completed if task.result.as_ref().map_or(true, is_empty_result) => {
                conflicts.push(Conflict::new(
                    ConflictKind::Missing,
                    &format!("No data found for {}", task.id),
                    vec![task.id.clone()],
                    "Consider broadening search criteria or using alternative data sources",
                ));
            }
            TaskStatus::Failed => {
                conflicts.push(Conflict::new(
                    ConflictKind::QualityFailure,
                    &format!(
                        "Query failed for {}: {}",
                        task.id,
                        task.error.as_deref().unwrap_or("unknown error")
                    ),
                    vec![task.id.clone()],
                    "Review query parameters and retry",
                ));
            }
            _ => {}
        }
    }

    conflicts.extend(evidence_contradictions(findings));

    GateVerdict {
        requires_review: !conflicts.is_empty(),
        conflicts,
        source: VerdictSource::RuleBased,
    }
}

fn evidence_contradictions(findings: &Findings) -> Vec<Conflict> {
    let mut levels: BTreeMap<&str, (BTreeSet<&str>, BTreeSet<&TaskId>)> = BTreeMap::new();
    for (task_id, result) in findings.iter() {
        let Value::Array(records) = result else {
            continue;
        };
        for record in records {
            let gene = record.get("gene").and_then(Value::as_str);
            let level = record.get("evidence_level").and_then(Value::as_str);
            if let (Some(gene), Some(level)) = (gene, level) {
                let entry = levels.entry(gene).or_default();
                entry.0.insert(level);
                entry.1.insert(task_id);
            }
        }
    }

    levels
        .into_iter()
        .filter(|(_, (lvls, _))| lvls.len() > 2)
        .map(|(gene, (lvls, tasks))| {
            let lvls: Vec<&str> = lvls.into_iter().collect();
            Conflict::new(
                ConflictKind::Contradiction,
                &format!("Gene {} has multiple evidence levels: {}", gene, lvls.join(", ")),
                tasks.into_iter().cloned().collect(),
                "Review individual evidence items for context",
            )
            .with_entities(vec![gene.to_string()])
        })
        .collect()
}
