//! Session phase machine.
//!
//! Phase definitions, the legal transition table, and the tracker that
//! enforces it while recording the visit history.

mod state;
mod types;

pub use state::{PhaseHistoryEntry, PhaseTracker};
pub use types::{Phase, SessionId};
