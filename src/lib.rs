pub mod checkpoint;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod session;
pub mod util;
pub mod workflow;

pub use checkpoint::{
    Checkpoint, CheckpointId, CheckpointManager, CheckpointOption, CheckpointResponse,
    CheckpointStore, FileStore, MemoryStore, OptionAdvisor, ResumeAction,
};
pub use config::Config;
pub use error::{CollaboratorError, Error, Result};
pub use orchestration::{
    Analyzer, Driver, ExecutionMode, Outcome, Planner, Report, RetrievalOutcome, Retriever,
    Synthesizer,
};
pub use session::Session;
pub use workflow::{Phase, SessionId};
