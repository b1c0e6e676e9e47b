//! Phase tracking with transition validation.
//!
//! `PhaseTracker` holds the current phase of a session and the history of
//! every phase entered. All phase changes go through [`PhaseTracker::transition`],
//! which checks the table in [`Phase::can_transition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::Phase;

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    /// The phase that was entered.
    pub phase: Phase,
    /// When this phase was entered.
    pub entered_at: DateTime<Utc>,
}

/// Current phase plus append-only history. History is for observability;
/// nothing in the driver branches on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTracker {
    current: Phase,
    history: Vec<PhaseHistoryEntry>,
}

impl PhaseTracker {
    /// Start in `Planning`, recorded as the first history entry.
    pub fn new() -> Self {
        Self {
            current: Phase::Planning,
            history: vec![PhaseHistoryEntry {
                phase: Phase::Planning,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn can_transition(&self, target: Phase) -> bool {
        self.current.can_transition(target)
    }

    /// Attempt to move to `target`.
    ///
    /// Returns an error if the transition is not in the table.
    pub fn transition(&mut self, target: Phase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }

        self.current = target;
        self.history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });

        Ok(())
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn history(&self) -> &[PhaseHistoryEntry] {
        &self.history
    }

    /// Phase names in visit order.
    pub fn visited(&self) -> Vec<Phase> {
        self.history.iter().map(|e| e.phase).collect()
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
