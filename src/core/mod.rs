//! Core domain models for research orchestration.
//!
//! Tasks, the validated plan DAG they form, and the append-only findings
//! collected while the plan runs.

pub mod finding;
pub mod plan;
pub mod task;

pub use finding::{is_empty_result, record_count, Findings};
pub use plan::{Plan, PlanDraft, StatusCounts, TaskDraft};
pub use task::{Parameters, Task, TaskId, TaskStatus};
