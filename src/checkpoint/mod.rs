//! Checkpoints: persisted pause points, the options they offer, and the
//! store behind them.

pub mod manager;
pub mod options;
pub mod store;
pub mod types;

pub use manager::{CheckpointManager, CHECKPOINTS, SESSIONS};
pub use options::{build_options, standard_options, CheckpointContext, OptionAdvisor};
pub use store::{CheckpointStore, FileStore, MemoryStore};
pub use types::{
    checkpoint_reason, Checkpoint, CheckpointId, CheckpointOption, CheckpointResponse,
    ResumeAction, StateSnapshot,
};
