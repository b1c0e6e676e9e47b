//! Orchestration layer.
//!
//! Dependency resolution, task execution, the consistency gate, planning and
//! synthesis collaborators with their fallbacks, and the driver that runs a
//! session through its phases.

pub mod driver;
pub mod gate;
pub mod planner;
pub mod resolver;
pub mod runner;
pub mod synthesis;

pub use driver::{Driver, DriverBuilder, ExecutionMode, Outcome, DEFAULT_MAX_OPTIONS};
pub use gate::{
    Analyzer, Conflict, ConflictKind, ConsistencyGate, FindingsSummary, GateLimits, GateVerdict,
    SummaryEntry, VerdictSource,
};
pub use planner::{
    extract_keywords, fallback_plan, plan_or_fallback, FallbackSources, PlanOrigin, Planner,
    FALLBACK_TASK_COUNT,
};
pub use runner::{
    effective_parameters, RetrievalContext, RetrievalOutcome, Retriever, RetrieverRegistry,
    TaskRunner,
};
pub use synthesis::{fallback_report, synthesize_or_fallback, Report, Synthesizer};
