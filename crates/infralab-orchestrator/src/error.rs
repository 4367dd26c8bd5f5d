//! Error types for the infralab orchestrator.
//!
//! This module defines the error hierarchy for all orchestrator operations,
//! including configuration loading, catalog checks, tool invocation and
//! progress persistence.
//!
//! Two failure kinds are deliberately absent: a non-zero exit code from the
//! tool is an ordinary [`infralab_runner::CommandOutput`], and a failed
//! validation is an ordinary [`crate::ValidationReport`]. Both are shown to the
//! user and never stop a session.

use std::path::PathBuf;

use infralab_runner::RunnerError;

/// A specialized `Result` type for infralab orchestrator operations.
pub type Result<T> = std::result::Result<T, LabError>;

/// Exit code for a fatal startup failure.
pub const EXIT_FATAL: u8 = 1;

/// Exit code for an unknown `--exercise` id.
pub const EXIT_INVALID_EXERCISE: u8 = 2;

/// Errors that can occur while running the lab engine.
///
/// Variants carry actionable suggestions where possible.
#[derive(Debug, thiserror::Error)]
pub enum LabError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in a configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your infralab.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Catalog Errors
    // ========================================================================
    /// The exercise catalog is inconsistent (unknown prerequisite, duplicate
    /// id, dependency cycle). This is never the learner's fault.
    #[error("Broken exercise catalog: {message}\n\nSuggestion: Fix the catalog definition; your progress is not affected")]
    CatalogError {
        /// Description of the inconsistency.
        message: String,
    },

    /// An exercise id was requested that the catalog does not contain.
    #[error("Unknown exercise: '{id}'\n\nSuggestion: Run 'infralab list' to see the available exercise ids")]
    ExerciseNotFound {
        /// The requested id.
        id: String,
    },

    // ========================================================================
    // External Tool Errors
    // ========================================================================
    /// The external tool binary is absent.
    #[error("Required tool not found: '{tool}'\n\nSuggestion: Install it or point INFRALAB_TOOL / toolPath at the binary, then retry")]
    ToolMissing {
        /// The configured program.
        tool: String,
    },

    /// The external tool exists but could not be started.
    #[error("Failed to start '{tool}': {message}\n\nSuggestion: Check that the binary is executable")]
    ToolFailed {
        /// The configured program.
        tool: String,
        /// The OS error.
        message: String,
    },

    /// A tool invocation exceeded the configured timeout and was terminated.
    #[error("'{command}' timed out after {timeout_secs}s and was stopped\n\nSuggestion: Retry, or raise commandTimeoutSecs in infralab.json")]
    CommandTimeout {
        /// The command line that timed out.
        command: String,
        /// The timeout in seconds.
        timeout_secs: u64,
    },

    /// A tool invocation was cancelled by the user.
    #[error("'{command}' was cancelled")]
    CommandCancelled {
        /// The command line that was cancelled.
        command: String,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// The progress file could not be parsed and was moved aside.
    #[error("Progress file '{path}' was unreadable ({message}); it was preserved as '{backup}' and a fresh record was started\n\nSuggestion: Inspect or restore the preserved file if you want the old progress back")]
    PersistenceCorruption {
        /// Path of the progress file.
        path: PathBuf,
        /// Where the unreadable file now lives.
        backup: PathBuf,
        /// The parse error.
        message: String,
    },

    /// The progress file exists but could not be read at all.
    #[error("Could not read progress file '{path}': {message}; progress for this run is kept in memory only\n\nSuggestion: Check the file permissions, then restart")]
    PersistenceReadFailure {
        /// Path of the progress file.
        path: PathBuf,
        /// The I/O error.
        message: String,
    },

    /// Saving the progress file failed; the on-disk file is unchanged.
    #[error("Failed to save progress to '{path}': {message}\n\nSuggestion: Check write permissions and available disk space; the previous progress file is intact")]
    PersistenceWriteFailure {
        /// Path of the progress file.
        path: PathBuf,
        /// Description of the write failure.
        message: String,
    },

    // ========================================================================
    // Interaction Errors
    // ========================================================================
    /// The terminal prompt failed (closed stdin, interrupted).
    #[error("Prompt failed: {message}")]
    Interaction {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LabError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `CatalogError`.
    #[must_use]
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::CatalogError {
            message: message.into(),
        }
    }

    /// Creates a new `ExerciseNotFound` error.
    #[must_use]
    pub fn exercise_not_found(id: impl Into<String>) -> Self {
        Self::ExerciseNotFound { id: id.into() }
    }

    /// Creates a new `PersistenceWriteFailure`.
    #[must_use]
    pub fn persistence_write(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PersistenceWriteFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Interaction` error.
    #[must_use]
    pub fn interaction(message: impl std::fmt::Display) -> Self {
        Self::Interaction {
            message: message.to_string(),
        }
    }

    /// Returns `true` if this error must terminate the run.
    ///
    /// Fatal errors come from broken configuration or a missing tool. Every
    /// other error is reported and the session continues.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::CatalogError { .. }
                | Self::ToolMissing { .. }
        )
    }

    /// Process exit code to use when this error ends the run.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ExerciseNotFound { .. } => EXIT_INVALID_EXERCISE,
            _ => EXIT_FATAL,
        }
    }
}

impl From<RunnerError> for LabError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::NotFound(tool) => Self::ToolMissing { tool },
            RunnerError::Spawn { program, source } => Self::ToolFailed {
                tool: program,
                message: source.to_string(),
            },
            RunnerError::Timeout { command, timeout } => Self::CommandTimeout {
                command,
                timeout_secs: timeout.as_secs(),
            },
            RunnerError::Cancelled { command } => Self::CommandCancelled { command },
            RunnerError::Io(e) => Self::Io(e),
        }
    }
}
