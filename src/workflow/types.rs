//! Core workflow type definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a research session.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new unique session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Phases of the orchestration state machine.
///
/// ```text
/// Planning -> Scheduling <-> Running -> Gating
/// Gating -> Checkpointing -> Resuming -> Scheduling | Aborted
/// Gating -> Scheduling | Finalizing -> Finalized
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Asking the planner for a plan.
    #[default]
    Planning,
    /// Choosing the next eligible task(s).
    Scheduling,
    /// Handing tasks to the runner.
    Running,
    /// Consistency check over findings.
    Gating,
    /// Paused at a checkpoint, waiting for an external response.
    Checkpointing,
    /// Applying a checkpoint response.
    Resuming,
    /// Writing the final report.
    Finalizing,
    /// Report written. Terminal.
    Finalized,
    /// Cancelled at a checkpoint. Terminal.
    Aborted,
}

impl Phase {
    /// Every phase, in declaration order.
    pub const ALL: [Phase; 9] = [
        Phase::Planning,
        Phase::Scheduling,
        Phase::Running,
        Phase::Gating,
        Phase::Checkpointing,
        Phase::Resuming,
        Phase::Finalizing,
        Phase::Finalized,
        Phase::Aborted,
    ];

    /// The transition table. Anything not listed is illegal.
    pub fn can_transition(self, target: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, target),
            (Planning, Scheduling)
                | (Scheduling, Running)
                | (Scheduling, Gating)
                | (Running, Scheduling)
                | (Running, Gating)
                | (Gating, Checkpointing)
                | (Gating, Scheduling)
                | (Gating, Finalizing)
                | (Checkpointing, Resuming)
                | (Resuming, Scheduling)
                | (Resuming, Aborted)
                | (Finalizing, Finalized)
        )
    }

    /// Finalized and Aborted accept no further work.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finalized | Phase::Aborted)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Planning => write!(f, "planning"),
            Phase::Scheduling => write!(f, "scheduling"),
            Phase::Running => write!(f, "running"),
            Phase::Gating => write!(f, "gating"),
            Phase::Checkpointing => write!(f, "checkpointing"),
            Phase::Resuming => write!(f, "resuming"),
            Phase::Finalizing => write!(f, "finalizing"),
            Phase::Finalized => write!(f, "finalized"),
            Phase::Aborted => write!(f, "aborted"),
        }
    }
}
