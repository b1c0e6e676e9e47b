//! Final report generation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Findings, Plan, TaskStatus};
use crate::error::CollaboratorError;

/// Writes the final report text.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        plan: &Plan,
        findings: &Findings,
        last_feedback: Option<&str>,
    ) -> std::result::Result<String, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub text: String,
    /// True when the text is the built-in fallback rather than synthesizer output.
    pub degraded: bool,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    pub fn new(text: String, degraded: bool) -> Self {
        Self {
            text,
            degraded,
            generated_at: Utc::now(),
        }
    }
}

/// Produce the report, falling back to [`fallback_report`] when there is no
/// synthesizer, it fails, or it returns blank text. Never fails.
pub async fn synthesize_or_fallback(
    synthesizer: Option<&dyn Synthesizer>,
    goal: &str,
    plan: Option<&Plan>,
    findings: &Findings,
    last_feedback: Option<&str>,
) -> Report {
    if let (Some(synthesizer), Some(plan)) = (synthesizer, plan) {
        match synthesizer.synthesize(plan, findings, last_feedback).await {
            Ok(text) if !text.trim().is_empty() => return Report::new(text, false),
            Ok(_) => tracing::warn!("synthesizer returned empty text, using fallback report"),
            Err(e) => tracing::warn!(error = %e, "synthesis failed, using fallback report"),
        }
    }
    Report::new(fallback_report(goal, plan, findings, last_feedback), true)
}

/// Plain Markdown summary built from the plan and findings alone.
pub fn fallback_report(
    goal: &str,
    plan: Option<&Plan>,
    findings: &Findings,
    last_feedback: Option<&str>,
) -> String {
    let mut out = format!("# Research Report\n\n## Research Question\n{}\n", goal);

    if let Some(plan) = plan {
        out.push_str("\n## Tasks\n");
        for task in plan.tasks() {
            out.push_str(&format!(
                "- {}: {} [{}] ({})\n",
                task.id, task.description, task.source, task.status
            ));
        }
    }

    out.push_str("\n## Findings\n");
    if findings.is_empty() {
        out.push_str("No data was collected.\n");
    }
    for task_id in findings.keys() {
        out.push_str(&format!(
            "- {}: {} record(s)\n",
            task_id,
            findings.record_count(task_id)
        ));
    }

    if let Some(plan) = plan {
        let failed: Vec<_> = plan
            .tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .collect();
        if !failed.is_empty() {
            out.push_str("\n## Failed Tasks\n");
            for task in failed {
                out.push_str(&format!(
                    "- {}: {}\n",
                    task.id,
                    task.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }

    if let Some(feedback) = last_feedback {
        out.push_str(&format!("\n## Reviewer Feedback\n{}\n", feedback));
    }

    out
}
