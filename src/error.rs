use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Plan contains a dependency cycle through task {task}")]
    CyclicPlan { task: String },

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Duplicate task id in plan: {0}")]
    DuplicateTask(String),

    #[error("Checkpoint trigger names unknown task: {0}")]
    UnknownCheckpointTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task transition for {task} from {from} to {to}")]
    InvalidTaskTransition {
        task: String,
        from: String,
        to: String,
    },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Finding already recorded for task {0}")]
    FindingExists(String),

    #[error("Unknown action {action} for checkpoint {checkpoint}")]
    UnknownAction { checkpoint: String, action: String },

    #[error("Session {0} is in a terminal state")]
    SessionTerminal(String),

    #[error("Session {0} is awaiting a checkpoint response")]
    AwaitingResponse(String),

    #[error("Session {0} has no pending checkpoint")]
    NoPendingCheckpoint(String),

    #[error("Checkpoint {checkpoint} was already answered with {action}")]
    CheckpointAnswered { checkpoint: String, action: String },

    #[error("Checkpoint {0} has no recorded response")]
    NoRecordedResponse(String),

    #[error("Session {session} stopped mid-stage with tasks in flight: {tasks}")]
    InterruptedStage { session: String, tasks: String },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by an external collaborator (planner, retriever,
/// analyzer, synthesizer, option advisor).
///
/// Kept apart from [`Error`] so a collaborator failure can only ever feed a
/// degradation path, never surface as a structural error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator failed: {0}")]
    Failed(String),

    #[error("malformed collaborator output: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
