//! Integration test suite for quest.
//!
//! These tests drive whole sessions through the public API with scripted
//! collaborators: planning, task execution, gating, pausing at checkpoints
//! and resuming, including resume after a simulated process restart.
//!
//! # Test Categories
//!
//! - `session_flow`: plan to report, pauses, failures and fallbacks
//! - `checkpoint_resume`: responses, scope changes, persistence, restart
//! - `scheduling`: resolver properties and batch execution bounds
//!
//! No test talks to a real data source or model.


mod checkpoint_resume;
mod scheduling;
mod session_flow;
