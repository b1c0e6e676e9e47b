//! Research session: the unit of persistence.
//!
//! A `Session` is created once per research request and mutated only by the
//! driver. Everything needed to resume it after a restart lives in the
//! [`StateSnapshot`] carried by its pending checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, StateSnapshot};
use crate::core::{Findings, Parameters, Plan, TaskId};
use crate::error::Result;
use crate::orchestration::gate::Conflict;
use crate::orchestration::synthesis::Report;
use crate::workflow::{Phase, PhaseHistoryEntry, PhaseTracker, SessionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub goal: String,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub findings: Findings,
    /// Every conflict reported by the gate so far.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    /// Fingerprints of conflicts already shown at a resolved checkpoint.
    #[serde(default)]
    pub acknowledged: Vec<String>,
    /// Parameter overrides applied to every task that runs from now on.
    #[serde(default)]
    pub scope: Parameters,
    #[serde(default)]
    pub pending_checkpoint: Option<Checkpoint>,
    phase: PhaseTracker,
    #[serde(default)]
    pub last_feedback: Option<String>,
    /// Set by a stop-and-export response; the session goes straight to the
    /// report at the next gate.
    #[serde(default)]
    pub export_requested: bool,
    #[serde(default)]
    pub report: Option<Report>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(goal: &str) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            goal: goal.to_string(),
            plan: None,
            findings: Findings::new(),
            conflicts: Vec::new(),
            acknowledged: Vec::new(),
            scope: Parameters::new(),
            pending_checkpoint: None,
            phase: PhaseTracker::new(),
            last_feedback: None,
            export_requested: false,
            report: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a session from the snapshot a checkpoint carries. The
    /// checkpoint becomes the pending one again.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let snapshot = checkpoint.state_snapshot.clone();
        Self {
            id: snapshot.session_id,
            goal: snapshot.goal,
            plan: snapshot.plan,
            findings: snapshot.findings,
            conflicts: snapshot.conflicts,
            acknowledged: snapshot.acknowledged,
            scope: snapshot.scope,
            pending_checkpoint: Some(checkpoint.clone()),
            phase: snapshot.phase,
            last_feedback: snapshot.last_feedback,
            export_requested: snapshot.export_requested,
            report: None,
            created_at: snapshot.created_at,
            updated_at: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            session_id: self.id,
            goal: self.goal.clone(),
            plan: self.plan.clone(),
            findings: self.findings.clone(),
            conflicts: self.conflicts.clone(),
            acknowledged: self.acknowledged.clone(),
            scope: self.scope.clone(),
            phase: self.phase.clone(),
            last_feedback: self.last_feedback.clone(),
            export_requested: self.export_requested,
            created_at: self.created_at,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.current()
    }

    pub fn history(&self) -> &[PhaseHistoryEntry] {
        self.phase.history()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.pending_checkpoint.is_some()
    }

    /// Move to `target` through the phase table.
    pub fn transition(&mut self, target: Phase) -> Result<()> {
        let from = self.phase();
        self.phase.transition(target)?;
        self.updated_at = Utc::now();
        tracing::debug!(session = %self.id.short(), %from, to = %target, "phase transition");
        Ok(())
    }

    /// Conflicts not yet acknowledged at an earlier checkpoint.
    pub fn unacknowledged<'a>(&self, conflicts: &'a [Conflict]) -> Vec<&'a Conflict> {
        conflicts
            .iter()
            .filter(|c| !self.acknowledged.contains(&c.fingerprint()))
            .collect()
    }

    /// Mark conflicts as seen so they do not force another review.
    pub fn acknowledge(&mut self, conflicts: &[Conflict]) {
        for conflict in conflicts {
            let fingerprint = conflict.fingerprint();
            if !self.acknowledged.contains(&fingerprint) {
                self.acknowledged.push(fingerprint);
            }
        }
    }

    /// Append conflicts the session has not recorded yet.
    pub fn record_conflicts(&mut self, conflicts: &[Conflict]) {
        for conflict in conflicts {
            if !self.conflicts.contains(conflict) {
                self.conflicts.push(conflict.clone());
            }
        }
    }

    /// Merge overrides into the session scope. Later keys win.
    pub fn narrow_scope(&mut self, overrides: &Parameters) {
        for (key, value) in overrides {
            self.scope.insert(key.clone(), value.clone());
        }
    }

    /// Skip every open task of `source`. Returns the skipped ids.
    pub fn skip_source(&mut self, source: &str) -> Result<Vec<TaskId>> {
        self.skip_where(|task_source| task_source == source)
    }

    /// Skip every open task. Returns the skipped ids.
    pub fn skip_open(&mut self) -> Result<Vec<TaskId>> {
        self.skip_where(|_| true)
    }

    fn skip_where(&mut self, matches: impl Fn(&str) -> bool) -> Result<Vec<TaskId>> {
        let mut skipped = Vec::new();
        if let Some(plan) = self.plan.as_mut() {
            for task in plan.tasks_mut() {
                if task.is_open() && matches(&task.source) {
                    task.skip()?;
                    skipped.push(task.id.clone());
                }
            }
        }
        Ok(skipped)
    }

    /// Short status string written to the session document.
    pub fn status(&self) -> &'static str {
        match self.phase() {
            Phase::Checkpointing => "awaiting_response",
            Phase::Finalized => "finalized",
            Phase::Aborted => "aborted",
            _ => "running",
        }
    }
}
