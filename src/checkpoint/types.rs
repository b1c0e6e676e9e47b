//! Checkpoint records: pause points that need an external decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Findings, Parameters, Plan};
use crate::orchestration::gate::Conflict;
use crate::workflow::{PhaseTracker, SessionId};

/// Identifier of a checkpoint, e.g. `cp_1a2b3c4d`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(pub String);

impl CheckpointId {
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("cp_{}", &hex[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CheckpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Effect of a checkpoint option when it is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ResumeAction {
    /// Carry on with the plan as is.
    Continue,
    /// Merge parameter overrides into every task that runs afterwards.
    NarrowScope { overrides: Parameters },
    /// Skip every task of `source` that has not started.
    SkipSource { source: String },
    /// Skip everything that has not started and go to the report.
    StopAndExport,
    /// End the session without running anything else.
    Abort,
}

impl ResumeAction {
    pub fn is_abort(&self) -> bool {
        matches!(self, ResumeAction::Abort)
    }
}

/// One legal response at a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointOption {
    pub label: String,
    pub action_id: String,
    pub effect_description: String,
    pub action: ResumeAction,
}

impl CheckpointOption {
    pub fn new(label: &str, action_id: &str, effect: &str, action: ResumeAction) -> Self {
        Self {
            label: label.to_string(),
            action_id: action_id.to_string(),
            effect_description: effect.to_string(),
            action,
        }
    }

    pub fn proceed() -> Self {
        Self::new(
            "Continue with full search",
            "continue",
            "Run all remaining tasks as planned",
            ResumeAction::Continue,
        )
    }

    pub fn skip_source(source: &str) -> Self {
        Self::new(
            &format!("Skip remaining {} tasks", source),
            &format!("skip:{}", source),
            &format!("Mark every {} task that has not started as skipped", source),
            ResumeAction::SkipSource {
                source: source.to_string(),
            },
        )
    }

    pub fn narrow_scope(label: &str, overrides: Parameters) -> Self {
        Self::new(
            label,
            "narrow_scope",
            "Apply narrowed parameters to every task that runs from now on",
            ResumeAction::NarrowScope { overrides },
        )
    }

    pub fn stop_and_export() -> Self {
        Self::new(
            "Export current findings",
            "stop_and_export",
            "Skip remaining tasks and write the report from results so far",
            ResumeAction::StopAndExport,
        )
    }

    pub fn abort() -> Self {
        Self::new(
            "Abort research",
            "abort",
            "Cancel the session without running further tasks",
            ResumeAction::Abort,
        )
    }
}

/// The caller's answer at a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointResponse {
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl CheckpointResponse {
    pub fn new(action_id: &str) -> Self {
        Self {
            action_id: action_id.to_string(),
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: &str) -> Self {
        self.feedback = Some(feedback.to_string());
        self
    }
}

/// Full orchestration state at pause time. Enough to rebuild the session
/// after a process restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub session_id: SessionId,
    pub goal: String,
    pub plan: Option<Plan>,
    pub findings: Findings,
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub acknowledged: Vec<String>,
    #[serde(default)]
    pub scope: Parameters,
    pub phase: PhaseTracker,
    #[serde(default)]
    pub last_feedback: Option<String>,
    #[serde(default)]
    pub export_requested: bool,
    pub created_at: DateTime<Utc>,
}

/// A persisted pause point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub reason: String,
    pub conflicts: Vec<Conflict>,
    pub options: Vec<CheckpointOption>,
    pub state_snapshot: StateSnapshot,
    #[serde(default)]
    pub response: Option<CheckpointResponse>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(
        reason: String,
        conflicts: Vec<Conflict>,
        options: Vec<CheckpointOption>,
        state_snapshot: StateSnapshot,
    ) -> Self {
        Self {
            id: CheckpointId::generate(),
            reason,
            conflicts,
            options,
            state_snapshot,
            response: None,
            created_at: Utc::now(),
            responded_at: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.state_snapshot.session_id
    }

    /// Look up an option by its action id.
    pub fn option(&self, action_id: &str) -> Option<&CheckpointOption> {
        self.options.iter().find(|o| o.action_id == action_id)
    }

    pub fn is_resolved(&self) -> bool {
        self.response.is_some()
    }

    /// Attach the response and stamp the time.
    pub fn respond(&mut self, response: CheckpointResponse) {
        self.response = Some(response);
        self.responded_at = Some(Utc::now());
    }
}

/// Reason text shown to the reviewer.
pub fn checkpoint_reason(conflicts: &[Conflict]) -> String {
    if conflicts.is_empty() {
        "Research checkpoint: review findings and choose next action".to_string()
    } else {
        format!(
            "Found {} potential issue(s) requiring review",
            conflicts.len()
        )
    }
}
