//! infralab Orchestrator
//!
//! Exercise catalog, validators, progress persistence and the interactive
//! session state machine of the infralab lab engine.

pub mod catalog;
pub mod config;
pub mod error;
pub mod progress;
pub mod session;
pub mod validator;

#[cfg(test)]
mod testing;

pub use catalog::{Catalog, Difficulty, Exercise};
pub use config::{Config, ENV_PROGRESS_FILE, ENV_TOOL, ENV_WORKSPACE};
pub use error::{LabError, Result, EXIT_FATAL, EXIT_INVALID_EXERCISE};
pub use progress::{
    LoadedProgress, Persisted, ProgressFile, ProgressRecord, ProgressStatus, ProgressStore,
    POINTS_PER_EXERCISE,
};
pub use session::{Action, MenuChoice, MenuEntry, Notice, Prompter, SessionContext, SessionState};
pub use validator::{
    validate, StepResult, ValidationContext, ValidationOutcome, ValidationReport,
    ValidationResult, ValidationStep,
};
